use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{BuyerSnapshot, Model as OrderModel, OrderStatus, PaymentMethod},
    entities::order_item::Model as OrderItemModel,
    errors::ServiceError,
    services::orders::SellerOrder,
    ApiResponse, AppState,
};

/// A line item as frozen into the order.
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackedProduct {
    pub name: String,
    pub quantity: i32,
    pub price: i64,
}

impl From<&OrderItemModel> for TrackedProduct {
    fn from(item: &OrderItemModel) -> Self {
        Self {
            name: item.name.clone(),
            quantity: item.quantity,
            price: item.unit_price,
        }
    }
}

/// One stage of the tracking timeline.
#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineStage {
    pub label: String,
    pub reached: bool,
}

/// Buyer-facing view over an order: summary plus the four-stage timeline.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderTrackingView {
    pub code: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub amount: i64,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub verification_fee: i64,
    pub verify_product: bool,
    pub created_at: DateTime<Utc>,
    pub products: Vec<TrackedProduct>,
    pub timeline: Vec<TimelineStage>,
}

/// Each stage is reached iff the current status is at or past it in the
/// fixed ordering.
fn timeline_for(status: OrderStatus) -> Vec<TimelineStage> {
    const STAGES: [(&str, u8); 4] = [
        ("Order Received", 0),
        ("Payment Confirmed", 1),
        ("In Transit", 2),
        ("Delivered", 3),
    ];

    STAGES
        .iter()
        .map(|(label, rank)| TimelineStage {
            label: (*label).to_string(),
            reached: status.rank() >= *rank,
        })
        .collect()
}

fn tracking_view(order: OrderModel, items: &[OrderItemModel]) -> OrderTrackingView {
    OrderTrackingView {
        timeline: timeline_for(order.status),
        products: items.iter().map(TrackedProduct::from).collect(),
        code: order.code,
        status: order.status,
        payment_method: order.payment_method,
        amount: order.amount,
        subtotal: order.subtotal,
        shipping_fee: order.shipping_fee,
        verification_fee: order.verification_fee,
        verify_product: order.verify_product,
        created_at: order.created_at,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Order summary returned from status updates.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSummary {
    pub code: String,
    pub status: OrderStatus,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<OrderModel> for OrderSummary {
    fn from(order: OrderModel) -> Self {
        Self {
            code: order.code,
            status: order.status,
            amount: order.amount,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// A seller's slice of an order. Buyer identity and city are exposed so the
/// chat subsystem can be invoked.
#[derive(Debug, Serialize, ToSchema)]
pub struct SellerOrderView {
    pub code: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub buyer: Option<BuyerSnapshot>,
    pub shipping_city: String,
    pub items: Vec<SellerItemView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SellerItemView {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: i64,
}

impl From<SellerOrder> for SellerOrderView {
    fn from(seller_order: SellerOrder) -> Self {
        let order = seller_order.order;
        let shipping_city = order
            .shipping_info()
            .map(|shipping| shipping.city)
            .unwrap_or_default();

        Self {
            buyer: order.buyer(),
            shipping_city,
            code: order.code,
            status: order.status,
            payment_method: order.payment_method,
            created_at: order.created_at,
            items: seller_order
                .items
                .iter()
                .map(|item| SellerItemView {
                    product_id: item.product_id,
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        }
    }
}

/// Track an order by its code
#[utoipa::path(
    get,
    path = "/api/v1/orders/{code}/tracking",
    summary = "Track an order",
    params(("code" = String, Path, description = "Order code, e.g. TRG-58231947-K3M9QX")),
    responses(
        (status = 200, description = "Tracking view", body = ApiResponse<OrderTrackingView>),
        (status = 404, description = "Unknown order code", body = crate::errors::ErrorResponse),
    )
)]
pub async fn track_order(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<OrderTrackingView>>, ServiceError> {
    let (order, items) = state.services.orders.get_by_code(&code).await?;
    Ok(Json(ApiResponse::success(tracking_view(order, &items))))
}

/// Advance an order's status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{code}/status",
    summary = "Advance an order's status (forward-only)",
    params(("code" = String, Path, description = "Order code")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated order", body = ApiResponse<OrderSummary>),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order code", body = crate::errors::ErrorResponse),
    )
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderSummary>>, ServiceError> {
    let updated = state
        .services
        .orders
        .update_status(&code, request.status)
        .await?;
    Ok(Json(ApiResponse::success(OrderSummary::from(updated))))
}

/// List a seller's orders
#[utoipa::path(
    get,
    path = "/api/v1/sellers/{seller_id}/orders",
    summary = "List orders containing a seller's line items",
    params(("seller_id" = Uuid, Path, description = "Seller identifier")),
    responses(
        (status = 200, description = "Seller orders, newest first", body = ApiResponse<Vec<SellerOrderView>>),
    )
)]
pub async fn list_seller_orders(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<SellerOrderView>>>, ServiceError> {
    let orders = state.services.orders.list_for_seller(seller_id).await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(SellerOrderView::from).collect(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_reaches_stages_in_order() {
        let pending = timeline_for(OrderStatus::PendingCashPayment);
        assert_eq!(pending.len(), 4);
        assert!(pending[0].reached);
        assert!(!pending[1].reached);
        assert!(!pending[2].reached);
        assert!(!pending[3].reached);

        let shipped = timeline_for(OrderStatus::Shipped);
        assert!(shipped[0].reached);
        assert!(shipped[1].reached);
        assert!(shipped[2].reached);
        assert!(!shipped[3].reached);

        let delivered = timeline_for(OrderStatus::Delivered);
        assert!(delivered.iter().all(|stage| stage.reached));
    }

    #[test]
    fn timeline_labels_are_stable() {
        let labels: Vec<String> = timeline_for(OrderStatus::Confirmed)
            .into_iter()
            .map(|stage| stage.label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "Order Received",
                "Payment Confirmed",
                "In Transit",
                "Delivered"
            ]
        );
    }
}
