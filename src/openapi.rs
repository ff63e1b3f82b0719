use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Treg API",
        description = "Checkout and order lifecycle backend for the Treg marketplace"
    ),
    paths(
        crate::handlers::checkout::create_cash_order,
        crate::handlers::checkout::initiate_remote_payment,
        crate::handlers::orders::track_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::list_seller_orders,
        crate::handlers::notifications::get_preferences,
        crate::handlers::notifications::update_preferences,
        crate::handlers::health::health_check,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentMethod,
        crate::entities::order::ShippingInfo,
        crate::entities::order::BuyerSnapshot,
        crate::services::checkout::CartItemInput,
        crate::services::checkout::CheckoutSession,
        crate::services::payments::RedirectTarget,
        crate::services::notifications::UpdatePreferencesRequest,
        crate::handlers::checkout::CheckoutReceipt,
        crate::handlers::checkout::RemotePaymentRequest,
        crate::handlers::orders::OrderTrackingView,
        crate::handlers::orders::TrackedProduct,
        crate::handlers::orders::TimelineStage,
        crate::handlers::orders::OrderSummary,
        crate::handlers::orders::SellerOrderView,
        crate::handlers::orders::SellerItemView,
        crate::handlers::notifications::PreferencesResponse,
        crate::handlers::health::HealthStatus,
    ))
)]
pub struct ApiDoc;

/// Swagger UI at `/docs`, spec at `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
