use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::CheckoutConfig,
    entities::order::{BuyerSnapshot, Model as OrderModel, PaymentMethod, ShippingInfo},
    entities::order_item::Model as OrderItemModel,
    errors::ServiceError,
    services::notifications::NotificationService,
    services::order_code::OrderCodeGenerator,
    services::orders::{NewOrder, NewOrderItem, OrderService, OrderTotals},
    services::payments::{
        PaymentIntent, PaymentLineItem, PaymentRouter, RedirectTarget, RouteOutcome,
    },
};

/// One cart line as submitted by the buyer's session. Prices come from the
/// catalog subsystem and are treated as read-only input here.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartItemInput {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    #[validate(range(min = 0, message = "Unit price cannot be negative"))]
    pub unit_price: i64,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub seller_id: Uuid,
    #[validate(length(min = 1, message = "Seller name is required"))]
    pub seller_name: String,
}

/// Explicit checkout context: cart, shipping profile, optional buyer
/// identity, verification flag. Consumed by value on success, which is what
/// clears the transient cart/shipping state for the attempt.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutSession {
    #[validate]
    pub items: Vec<CartItemInput>,
    #[validate]
    pub shipping: ShippingInfo,
    pub buyer: Option<BuyerSnapshot>,
    #[serde(default)]
    pub verify_product: bool,
}

/// Orchestrates cart + shipping + payment choice into an order record.
pub struct CheckoutService {
    orders: Arc<OrderService>,
    payments: Arc<PaymentRouter>,
    notifications: Arc<NotificationService>,
    code_generator: OrderCodeGenerator,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderService>,
        payments: Arc<PaymentRouter>,
        notifications: Arc<NotificationService>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            notifications,
            code_generator: OrderCodeGenerator::new(),
            config,
        }
    }

    /// Cash-on-delivery checkout: totals, code, persisted order, best-effort
    /// confirmation emails. Email failures never roll back the order.
    #[instrument(skip(self, session), fields(items = session.items.len(), verify = session.verify_product))]
    pub async fn create_cash_order(
        &self,
        session: CheckoutSession,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        validate_session(&session)?;
        let totals = compute_totals(&session.items, session.verify_product, &self.config)?;

        let items: Vec<NewOrderItem> = session
            .items
            .iter()
            .map(|item| NewOrderItem {
                product_id: item.product_id,
                name: item.name.clone(),
                unit_price: item.unit_price,
                quantity: item.quantity,
                seller_id: item.seller_id,
                seller_name: item.seller_name.clone(),
            })
            .collect();

        let mut last_conflict = None;
        for attempt in 0..self.config.code_generation_attempts {
            let code = self.code_generator.generate();
            let new_order = NewOrder {
                code: code.clone(),
                status: crate::entities::order::OrderStatus::PendingCashPayment,
                payment_method: PaymentMethod::Cash,
                totals,
                verify_product: session.verify_product,
                shipping_info: session.shipping.clone(),
                buyer: session.buyer.clone(),
                items: items.clone(),
            };

            match self.orders.create_order(new_order).await {
                Ok((order, order_items)) => {
                    if let Err(e) = self
                        .notifications
                        .dispatch_order_confirmation(&order, &order_items)
                        .await
                    {
                        warn!(error = %e, code = %order.code, "failed to dispatch order confirmation");
                    }
                    if order.verify_product {
                        if let Err(e) = self
                            .notifications
                            .dispatch_verification_confirmation(&order)
                            .await
                        {
                            warn!(error = %e, code = %order.code, "failed to dispatch verification confirmation");
                        }
                    }

                    info!(code = %order.code, amount = order.amount, "cash checkout completed");
                    return Ok((order, order_items));
                }
                Err(ServiceError::Conflict(msg)) => {
                    warn!(attempt = attempt + 1, code = %code, "order code collision; regenerating");
                    last_conflict = Some(msg);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::InternalError(format!(
            "could not allocate a unique order code after {} attempts: {}",
            self.config.code_generation_attempts,
            last_conflict.unwrap_or_default()
        )))
    }

    /// Card/wallet checkout: builds a hosted payment session and returns the
    /// redirect target. No order record is created on this path; the
    /// provider's success callback is the sole authority that materializes
    /// and confirms it.
    #[instrument(skip(self, session), fields(method = %method, items = session.items.len()))]
    pub async fn initiate_remote_payment(
        &self,
        method: PaymentMethod,
        session: CheckoutSession,
    ) -> Result<RedirectTarget, ServiceError> {
        if method == PaymentMethod::Cash {
            return Err(ServiceError::InvalidOperation(
                "cash checkout does not use a payment session".to_string(),
            ));
        }

        validate_session(&session)?;
        let totals = compute_totals(&session.items, session.verify_product, &self.config)?;

        let line_items: Vec<PaymentLineItem> = session
            .items
            .iter()
            .map(|item| PaymentLineItem {
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();

        let intent = PaymentIntent {
            amount: totals.amount,
            description: format!(
                "Treg order for {} ({} item(s))",
                session.shipping.first_name,
                session.items.len()
            ),
            line_items,
        };

        match self.payments.route(method, &intent).await? {
            RouteOutcome::Redirect(target) => Ok(target),
            RouteOutcome::Finalize { .. } => Err(ServiceError::InternalError(
                "payment router finalized a redirect method".to_string(),
            )),
        }
    }
}

fn validate_session(session: &CheckoutSession) -> Result<(), ServiceError> {
    if session.items.is_empty() {
        return Err(ServiceError::ValidationError("Cart is empty".to_string()));
    }
    session.validate()?;
    Ok(())
}

/// Totals in exact integer arithmetic. The shipping fee is charged on every
/// order; the verification fee only when the add-on was requested.
pub fn compute_totals(
    items: &[CartItemInput],
    verify_product: bool,
    config: &CheckoutConfig,
) -> Result<OrderTotals, ServiceError> {
    let mut subtotal: i64 = 0;
    for item in items {
        let line_total = item
            .unit_price
            .checked_mul(i64::from(item.quantity))
            .ok_or_else(|| ServiceError::ValidationError("cart total overflows".to_string()))?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or_else(|| ServiceError::ValidationError("cart total overflows".to_string()))?;
    }

    let verification_fee = if verify_product {
        config.verification_fee
    } else {
        0
    };
    let amount = subtotal
        .checked_add(config.shipping_fee)
        .and_then(|v| v.checked_add(verification_fee))
        .ok_or_else(|| ServiceError::ValidationError("cart total overflows".to_string()))?;

    Ok(OrderTotals {
        subtotal,
        shipping_fee: config.shipping_fee,
        verification_fee,
        amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(unit_price: i64, quantity: i32) -> CartItemInput {
        CartItemInput {
            product_id: Uuid::new_v4(),
            name: "Leather jacket".into(),
            unit_price,
            quantity,
            seller_id: Uuid::new_v4(),
            seller_name: "Vintage Tirana".into(),
        }
    }

    fn config() -> CheckoutConfig {
        CheckoutConfig {
            shipping_fee: 500,
            verification_fee: 200,
            code_generation_attempts: 3,
        }
    }

    #[test]
    fn totals_without_verification() {
        let totals = compute_totals(&[item(85_000, 1)], false, &config()).unwrap();
        assert_eq!(totals.subtotal, 85_000);
        assert_eq!(totals.shipping_fee, 500);
        assert_eq!(totals.verification_fee, 0);
        assert_eq!(totals.amount, 85_500);
    }

    #[test]
    fn totals_with_verification() {
        let totals = compute_totals(&[item(85_000, 1)], true, &config()).unwrap();
        assert_eq!(totals.verification_fee, 200);
        assert_eq!(totals.amount, 85_700);
    }

    #[test]
    fn totals_multiply_quantities() {
        let totals = compute_totals(&[item(1_500, 3), item(200, 2)], false, &config()).unwrap();
        assert_eq!(totals.subtotal, 4_900);
        assert_eq!(totals.amount, 5_400);
    }

    #[test]
    fn totals_reject_overflow() {
        let result = compute_totals(&[item(i64::MAX, 2)], false, &config());
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }
}
