pub mod checkout;
pub mod health;
pub mod notifications;
pub mod orders;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::checkout::CheckoutService;
use crate::services::notifications::{
    EmailOutbox, EmailSender, HttpEmailSender, LogOnlyEmailSender, NotificationService,
};
use crate::services::orders::OrderService;
use crate::services::payments::PaymentRouter;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub notifications: Arc<NotificationService>,
    pub payments: Arc<PaymentRouter>,
    pub outbox: Arc<EmailOutbox>,
}

impl AppServices {
    /// Builds the service container, wiring the email sender from
    /// configuration: HTTP dispatch when an endpoint is configured, log-only
    /// otherwise.
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let email_sender: Arc<dyn EmailSender> = match &config.email.endpoint {
            Some(endpoint) => Arc::new(HttpEmailSender::new(
                endpoint.clone(),
                Duration::from_secs(config.email.request_timeout_secs),
            )?),
            None => Arc::new(LogOnlyEmailSender),
        };
        Self::new_with_email_sender(db, event_sender, config, email_sender)
    }

    /// Same wiring with an injected email sender; used by tests.
    pub fn new_with_email_sender(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        email_sender: Arc<dyn EmailSender>,
    ) -> Result<Self, ServiceError> {
        let outbox = Arc::new(EmailOutbox::new(email_sender));
        let notifications = Arc::new(NotificationService::new(db.clone(), outbox.clone()));
        let payments = Arc::new(PaymentRouter::new(
            config.payment.clone(),
            config.currency.clone(),
            event_sender.clone(),
        )?);
        let orders = Arc::new(OrderService::new(db, event_sender, notifications.clone()));
        let checkout = Arc::new(CheckoutService::new(
            orders.clone(),
            payments.clone(),
            notifications.clone(),
            config.checkout.clone(),
        ));

        Ok(Self {
            orders,
            checkout,
            notifications,
            payments,
            outbox,
        })
    }
}

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/cash", post(checkout::create_cash_order))
        .route(
            "/checkout/payment-session",
            post(checkout::initiate_remote_payment),
        )
        .route("/orders/:code/tracking", get(orders::track_order))
        .route("/orders/:code/status", put(orders::update_order_status))
        .route("/sellers/:seller_id/orders", get(orders::list_seller_orders))
        .route(
            "/users/:user_id/notification-preferences",
            get(notifications::get_preferences).put(notifications::update_preferences),
        )
}
