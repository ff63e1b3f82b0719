#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body,
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use treg_api::{
    config::AppConfig,
    db,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::notifications::{EmailMessage, EmailSender},
    AppState,
};

/// Email sender that records every delivered message.
#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

/// Email sender that always fails.
pub struct FailingEmailSender;

#[async_trait]
impl EmailSender for FailingEmailSender {
    async fn send(&self, _message: &EmailMessage) -> Result<(), ServiceError> {
        Err(ServiceError::NotificationDispatch(
            "email service unavailable".to_string(),
        ))
    }
}

/// Helper harness spinning up application state backed by a throwaway
/// SQLite database.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub emails: Arc<RecordingEmailSender>,
}

impl TestApp {
    pub async fn new() -> Self {
        let recorder = Arc::new(RecordingEmailSender::default());
        Self::build(None, recorder.clone(), recorder).await
    }

    pub async fn with_payment_base_url(base_url: &str) -> Self {
        let recorder = Arc::new(RecordingEmailSender::default());
        Self::build(Some(base_url.to_string()), recorder.clone(), recorder).await
    }

    pub async fn with_email_sender(sender: Arc<dyn EmailSender>) -> Self {
        let recorder = Arc::new(RecordingEmailSender::default());
        Self::build(None, sender, recorder).await
    }

    async fn build(
        payment_base_url: Option<String>,
        email_sender: Arc<dyn EmailSender>,
        emails: Arc<RecordingEmailSender>,
    ) -> Self {
        let db_file = std::env::temp_dir().join(format!("treg-test-{}.db", Uuid::new_v4()));
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        if let Some(base_url) = payment_base_url {
            cfg.payment.base_url = base_url;
        }

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new_with_email_sender(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            &cfg,
            email_sender,
        )
        .expect("failed to build services");

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };
        let router = treg_api::app_router(state.clone());

        Self {
            router,
            state,
            emails,
        }
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::to_vec(&payload).expect("request payload"),
                ))
                .expect("request"),
            None => builder.body(axum::body::Body::empty()).expect("request"),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("response")
    }

    /// Attempts delivery of everything in the email outbox; returns the
    /// number delivered.
    pub async fn drain_outbox(&self) -> usize {
        self.state.services.outbox.drain_once().await
    }

    pub async fn sent_emails(&self) -> Vec<EmailMessage> {
        self.emails.sent.lock().await.clone()
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn cart_item(name: &str, unit_price: i64, quantity: i32) -> Value {
    json!({
        "product_id": Uuid::new_v4().to_string(),
        "name": name,
        "unit_price": unit_price,
        "quantity": quantity,
        "seller_id": Uuid::new_v4().to_string(),
        "seller_name": "Vintage Tirana",
    })
}

pub fn shipping_profile() -> Value {
    json!({
        "first_name": "Arta",
        "last_name": "Hoxha",
        "email": "arta@example.com",
        "phone": "+355691234567",
        "address": "Rruga e Durresit 12",
        "city": "Tirana",
        "postal_code": "1001",
    })
}

pub fn checkout_session(items: Vec<Value>, verify_product: bool) -> Value {
    json!({
        "items": items,
        "shipping": shipping_profile(),
        "buyer": null,
        "verify_product": verify_product,
    })
}

pub fn checkout_session_for_buyer(
    items: Vec<Value>,
    verify_product: bool,
    user_id: Uuid,
) -> Value {
    json!({
        "items": items,
        "shipping": shipping_profile(),
        "buyer": { "user_id": user_id.to_string(), "display_name": "Arta H." },
        "verify_product": verify_product,
    })
}
