use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entities::order::{Model as OrderModel, OrderStatus, PaymentMethod},
    errors::ServiceError,
    services::checkout::CheckoutSession,
    services::payments::RedirectTarget,
    ApiResponse, AppState,
};

/// What the buyer gets back from a completed cash checkout.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutReceipt {
    pub code: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub amount: i64,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub verification_fee: i64,
    pub created_at: DateTime<Utc>,
}

impl From<OrderModel> for CheckoutReceipt {
    fn from(order: OrderModel) -> Self {
        Self {
            code: order.code,
            status: order.status,
            payment_method: order.payment_method,
            amount: order.amount,
            subtotal: order.subtotal,
            shipping_fee: order.shipping_fee,
            verification_fee: order.verification_fee,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RemotePaymentRequest {
    pub method: PaymentMethod,
    pub session: CheckoutSession,
}

/// Cash-on-delivery checkout
#[utoipa::path(
    post,
    path = "/api/v1/checkout/cash",
    summary = "Create a cash-on-delivery order",
    request_body = CheckoutSession,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CheckoutReceipt>),
        (status = 400, description = "Invalid cart or shipping profile", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order could not be persisted", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_cash_order(
    State(state): State<AppState>,
    Json(session): Json<CheckoutSession>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutReceipt>>), ServiceError> {
    let (order, _items) = state.services.checkout.create_cash_order(session).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CheckoutReceipt::from(order))),
    ))
}

/// Card/wallet checkout: construct a hosted payment session
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment-session",
    summary = "Construct a hosted payment session and return its redirect target",
    request_body = RemotePaymentRequest,
    responses(
        (status = 200, description = "Redirect target", body = ApiResponse<RedirectTarget>),
        (status = 400, description = "Invalid cart, shipping profile, or method", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider failure", body = crate::errors::ErrorResponse),
    )
)]
pub async fn initiate_remote_payment(
    State(state): State<AppState>,
    Json(request): Json<RemotePaymentRequest>,
) -> Result<Json<ApiResponse<RedirectTarget>>, ServiceError> {
    let target = state
        .services
        .checkout
        .initiate_remote_payment(request.method, request.session)
        .await?;
    Ok(Json(ApiResponse::success(target)))
}
