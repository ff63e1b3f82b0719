use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
    TransactionTrait,
};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, BuyerSnapshot, Entity as OrderEntity,
        Model as OrderModel, OrderStatus, PaymentMethod, ShippingInfo,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::notifications::NotificationService,
    services::order_code,
};

/// Totals for an order, in minor currency units. The store enforces
/// `amount == subtotal + shipping_fee + verification_fee` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub verification_fee: i64,
    pub amount: i64,
}

/// One line item to freeze into a new order.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub seller_id: Uuid,
    pub seller_name: String,
}

/// Everything needed to persist a new order record.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub code: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub totals: OrderTotals,
    pub verify_product: bool,
    pub shipping_info: ShippingInfo,
    pub buyer: Option<BuyerSnapshot>,
    pub items: Vec<NewOrderItem>,
}

/// An order scoped to one seller's line items.
#[derive(Debug, Clone)]
pub struct SellerOrder {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Store over the `orders` and `order_items` tables. The only shared mutable
/// resource of the checkout core; status updates are serialized per code.
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    notifications: Arc<NotificationService>,
    status_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifications,
            status_locks: DashMap::new(),
        }
    }

    /// Persists a new order with its line items in one transaction.
    ///
    /// Rejects a duplicate code with `Conflict` so the caller can retry with
    /// a fresh one, and rejects records that break the amount invariant.
    #[instrument(skip(self, new_order), fields(code = %new_order.code))]
    pub async fn create_order(
        &self,
        new_order: NewOrder,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        validate_new_order(&new_order)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let existing = OrderEntity::find()
            .filter(order::Column::Code.eq(new_order.code.clone()))
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "order code {} already exists",
                new_order.code
            )));
        }

        let buyer = new_order
            .buyer
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let order_active = OrderActiveModel {
            id: Set(order_id),
            code: Set(new_order.code.clone()),
            status: Set(new_order.status),
            payment_method: Set(new_order.payment_method),
            amount: Set(new_order.totals.amount),
            subtotal: Set(new_order.totals.subtotal),
            shipping_fee: Set(new_order.totals.shipping_fee),
            verification_fee: Set(new_order.totals.verification_fee),
            verify_product: Set(new_order.verify_product),
            shipping_info: Set(serde_json::to_value(&new_order.shipping_info)?),
            buyer: Set(buyer),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order_model = order_active.insert(&txn).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::Conflict(format!("order code {} already exists", new_order.code))
            } else {
                error!(error = %e, order_id = %order_id, "failed to insert order");
                ServiceError::DatabaseError(e)
            }
        })?;

        let mut item_models = Vec::with_capacity(new_order.items.len());
        for item in &new_order.items {
            let item_active = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                seller_id: Set(item.seller_id),
                seller_name: Set(item.seller_name.clone()),
                created_at: Set(now),
            };
            item_models.push(item_active.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, "failed to insert order item");
                ServiceError::DatabaseError(e)
            })?);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        counter!("treg_orders_created_total", 1);
        info!(code = %order_model.code, amount = order_model.amount, "order created");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderCreated {
                code: order_model.code.clone(),
                amount: order_model.amount,
            })
            .await
        {
            warn!(error = %e, code = %order_model.code, "failed to send order created event");
        }

        Ok((order_model, item_models))
    }

    /// Resolves an order and its line items by code.
    #[instrument(skip(self))]
    pub async fn get_by_code(
        &self,
        code: &str,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        if !order_code::is_valid_code(code) {
            return Err(ServiceError::NotFound(format!("Order {code} not found")));
        }

        let order_model = OrderEntity::find()
            .filter(order::Column::Code.eq(code))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {code} not found")))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_model.id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((order_model, items))
    }

    /// Advances an order's status. Forward-only: regressions and same-status
    /// updates are rejected with `InvalidTransition` and leave the record
    /// unchanged. Calls racing on the same code are serialized.
    #[instrument(skip(self), fields(code = %code, new_status = %new_status))]
    pub async fn update_status(
        &self,
        code: &str,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let lock = {
            let entry = self.status_locks.entry(code.to_owned()).or_default();
            entry.clone()
        };
        let _guard = lock.lock().await;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start transaction for status update");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = OrderEntity::find()
            .filter(order::Column::Code.eq(code))
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {code} not found")))?;

        let old_status = order_model.status;
        if !old_status.can_advance_to(new_status) {
            warn!(
                code = %code,
                from = %old_status,
                to = %new_status,
                "rejected status transition"
            );
            return Err(ServiceError::InvalidTransition {
                from: old_status,
                to: new_status,
            });
        }

        let mut active: OrderActiveModel = order_model.into();
        let current_version = *active.version.as_ref();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(current_version + 1);

        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, code = %code, "failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, code = %code, "failed to commit status update");
            ServiceError::DatabaseError(e)
        })?;

        counter!("treg_order_status_transitions_total", 1);
        info!(code = %code, from = %old_status, to = %new_status, "order status updated");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                code: updated.code.clone(),
                old_status,
                new_status,
            })
            .await
        {
            warn!(error = %e, code = %code, "failed to send status changed event");
        }

        // Status-change email is best-effort; it never rolls back the update.
        if let Err(e) = self
            .notifications
            .dispatch_status_update(&updated, old_status)
            .await
        {
            warn!(error = %e, code = %code, "failed to dispatch status update notification");
        }

        Ok(updated)
    }

    /// Orders containing at least one of the seller's line items, newest
    /// first, carrying only that seller's items.
    #[instrument(skip(self), fields(seller_id = %seller_id))]
    pub async fn list_for_seller(&self, seller_id: Uuid) -> Result<Vec<SellerOrder>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::SellerId.eq(seller_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_order: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }

        let order_ids: Vec<Uuid> = by_order.keys().copied().collect();
        let orders = OrderEntity::find()
            .filter(order::Column::Id.is_in(order_ids))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(orders
            .into_iter()
            .map(|order_model| {
                let items = by_order.remove(&order_model.id).unwrap_or_default();
                SellerOrder {
                    order: order_model,
                    items,
                }
            })
            .collect())
    }
}

fn validate_new_order(new_order: &NewOrder) -> Result<(), ServiceError> {
    if new_order.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "an order must contain at least one line item".to_string(),
        ));
    }

    let totals = &new_order.totals;
    if totals.subtotal < 0
        || totals.shipping_fee < 0
        || totals.verification_fee < 0
        || totals.amount < 0
    {
        return Err(ServiceError::ValidationError(
            "order amounts must be non-negative".to_string(),
        ));
    }

    let expected = totals
        .subtotal
        .checked_add(totals.shipping_fee)
        .and_then(|v| v.checked_add(totals.verification_fee))
        .ok_or_else(|| ServiceError::ValidationError("order amount overflows".to_string()))?;
    if totals.amount != expected {
        return Err(ServiceError::ValidationError(format!(
            "order amount {} does not equal subtotal + shipping + verification ({expected})",
            totals.amount
        )));
    }

    if new_order.verify_product && totals.verification_fee == 0 {
        return Err(ServiceError::ValidationError(
            "verification was requested but no verification fee was applied".to_string(),
        ));
    }
    if !new_order.verify_product && totals.verification_fee != 0 {
        return Err(ServiceError::ValidationError(
            "a verification fee was applied without verification".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(subtotal: i64, shipping: i64, verification: i64) -> OrderTotals {
        OrderTotals {
            subtotal,
            shipping_fee: shipping,
            verification_fee: verification,
            amount: subtotal + shipping + verification,
        }
    }

    fn new_order(totals: OrderTotals, verify: bool) -> NewOrder {
        NewOrder {
            code: "TRG-12345678-ABCDEF".to_string(),
            status: OrderStatus::PendingCashPayment,
            payment_method: PaymentMethod::Cash,
            totals,
            verify_product: verify,
            shipping_info: ShippingInfo {
                first_name: "Arta".into(),
                last_name: "Hoxha".into(),
                email: "arta@example.com".into(),
                phone: "+355691234567".into(),
                address: "Rruga e Durresit 12".into(),
                city: "Tirana".into(),
                postal_code: "1001".into(),
            },
            buyer: None,
            items: vec![NewOrderItem {
                product_id: Uuid::new_v4(),
                name: "Leather jacket".into(),
                unit_price: 85_000,
                quantity: 1,
                seller_id: Uuid::new_v4(),
                seller_name: "Vintage Tirana".into(),
            }],
        }
    }

    #[test]
    fn amount_invariant_is_enforced() {
        let mut order = new_order(totals(85_000, 500, 0), false);
        assert!(validate_new_order(&order).is_ok());

        order.totals.amount += 1;
        assert!(matches!(
            validate_new_order(&order),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn verification_fee_must_match_the_flag() {
        let with_fee_without_flag = new_order(totals(85_000, 500, 200), false);
        assert!(validate_new_order(&with_fee_without_flag).is_err());

        let with_flag_without_fee = new_order(totals(85_000, 500, 0), true);
        assert!(validate_new_order(&with_flag_without_fee).is_err());

        let consistent = new_order(totals(85_000, 500, 200), true);
        assert!(validate_new_order(&consistent).is_ok());
    }

    #[test]
    fn empty_orders_are_rejected() {
        let mut order = new_order(totals(0, 500, 0), false);
        order.items.clear();
        assert!(validate_new_order(&order).is_err());
    }
}
