use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::notification_preference::{
        ActiveModel as PreferenceActiveModel, Entity as PreferenceEntity, Model as PreferenceModel,
    },
    entities::order::{self, OrderStatus},
    entities::order_item,
    errors::ServiceError,
};

const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Email templates the order core dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    OrderConfirmation,
    VerificationConfirmation,
    OrderStatusUpdate,
}

impl EmailTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailTemplate::OrderConfirmation => "order_confirmation",
            EmailTemplate::VerificationConfirmation => "verification_confirmation",
            EmailTemplate::OrderStatusUpdate => "order_status_update",
        }
    }
}

/// One outbound email: recipient, template, template data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub recipient: String,
    pub template: EmailTemplate,
    pub data: serde_json::Value,
}

/// Delivery backend for the outbox. The HTTP implementation talks to the
/// external dispatch service; tests substitute recording or failing fakes.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError>;
}

/// POSTs each message to the configured dispatch endpoint.
pub struct HttpEmailSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmailSender {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build email client: {e}"))
            })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                ServiceError::NotificationDispatch(format!("email service unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::NotificationDispatch(format!(
                "email service returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Fallback when no dispatch endpoint is configured: log and succeed.
pub struct LogOnlyEmailSender;

#[async_trait]
impl EmailSender for LogOnlyEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        info!(
            recipient = %message.recipient,
            template = message.template.as_str(),
            "email dispatch endpoint not configured; logging instead"
        );
        Ok(())
    }
}

struct PendingEmail {
    message: EmailMessage,
    attempts: u32,
}

/// In-process outbox for best-effort email dispatch. Enqueue never fails and
/// never blocks order completion; delivery happens in `drain_once`, driven by
/// the background worker. Failed deliveries are retried up to
/// `MAX_DELIVERY_ATTEMPTS`, then dropped with an error log.
pub struct EmailOutbox {
    sender: Arc<dyn EmailSender>,
    pending: Mutex<VecDeque<PendingEmail>>,
}

impl EmailOutbox {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self {
            sender,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn enqueue(&self, message: EmailMessage) {
        counter!("treg_emails_enqueued_total", 1);
        debug!(
            recipient = %message.recipient,
            template = message.template.as_str(),
            "email enqueued"
        );
        self.pending.lock().await.push_back(PendingEmail {
            message,
            attempts: 0,
        });
    }

    /// Attempts delivery of everything currently queued. Returns the number
    /// of messages delivered in this pass.
    pub async fn drain_once(&self) -> usize {
        let batch: Vec<PendingEmail> = {
            let mut pending = self.pending.lock().await;
            pending.drain(..).collect()
        };

        let mut delivered = 0;
        for mut entry in batch {
            match self.sender.send(&entry.message).await {
                Ok(()) => {
                    counter!("treg_emails_delivered_total", 1);
                    delivered += 1;
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts < MAX_DELIVERY_ATTEMPTS {
                        warn!(
                            recipient = %entry.message.recipient,
                            template = entry.message.template.as_str(),
                            attempts = entry.attempts,
                            error = %e,
                            "email delivery failed; will retry"
                        );
                        self.pending.lock().await.push_back(entry);
                    } else {
                        counter!("treg_emails_dropped_total", 1);
                        error!(
                            recipient = %entry.message.recipient,
                            template = entry.message.template.as_str(),
                            error = %e,
                            "email delivery failed after {MAX_DELIVERY_ATTEMPTS} attempts; dropping"
                        );
                    }
                }
            }
        }
        delivered
    }

    pub async fn depth(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Background worker draining the outbox on a fixed poll interval.
pub fn start_worker(outbox: Arc<EmailOutbox>, poll_interval: Duration) {
    tokio::spawn(async move {
        loop {
            outbox.drain_once().await;
            tokio::time::sleep(poll_interval).await;
        }
    });
}

/// Notification channels the preference record gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    OrderUpdates,
    ChatMessages,
    MarketingEmails,
    ReviewRequests,
    SecurityAlerts,
    Push,
}

impl PreferenceModel {
    pub fn allows(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::OrderUpdates => self.email_order_updates,
            NotificationChannel::ChatMessages => self.email_chat_messages,
            NotificationChannel::MarketingEmails => self.email_marketing_emails,
            NotificationChannel::ReviewRequests => self.email_review_requests,
            NotificationChannel::SecurityAlerts => self.email_security_alerts,
            NotificationChannel::Push => self.push_notifications,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdatePreferencesRequest {
    pub email_order_updates: Option<bool>,
    pub email_chat_messages: Option<bool>,
    pub email_marketing_emails: Option<bool>,
    pub email_review_requests: Option<bool>,
    pub email_security_alerts: Option<bool>,
    pub push_notifications: Option<bool>,
}

/// Preference gate plus dispatch helpers for the order core's emails.
pub struct NotificationService {
    db: Arc<DbPool>,
    outbox: Arc<EmailOutbox>,
}

impl NotificationService {
    pub fn new(db: Arc<DbPool>, outbox: Arc<EmailOutbox>) -> Self {
        Self { db, outbox }
    }

    pub fn outbox(&self) -> Arc<EmailOutbox> {
        self.outbox.clone()
    }

    /// Preference record for a user; all-true defaults when none exists.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_preferences(&self, user_id: Uuid) -> Result<PreferenceModel, ServiceError> {
        let record = PreferenceEntity::find_by_id(user_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(record.unwrap_or_else(|| PreferenceModel::defaults(user_id, Utc::now())))
    }

    /// Upserts the per-user toggles. Only the owning user may call this;
    /// ownership is enforced by the session layer upstream.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        request: UpdatePreferencesRequest,
    ) -> Result<PreferenceModel, ServiceError> {
        let now = Utc::now();
        let existing = PreferenceEntity::find_by_id(user_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let current = existing
            .clone()
            .unwrap_or_else(|| PreferenceModel::defaults(user_id, now));

        let mut active = PreferenceActiveModel {
            user_id: Set(user_id),
            email_order_updates: Set(request
                .email_order_updates
                .unwrap_or(current.email_order_updates)),
            email_chat_messages: Set(request
                .email_chat_messages
                .unwrap_or(current.email_chat_messages)),
            email_marketing_emails: Set(request
                .email_marketing_emails
                .unwrap_or(current.email_marketing_emails)),
            email_review_requests: Set(request
                .email_review_requests
                .unwrap_or(current.email_review_requests)),
            email_security_alerts: Set(request
                .email_security_alerts
                .unwrap_or(current.email_security_alerts)),
            push_notifications: Set(request
                .push_notifications
                .unwrap_or(current.push_notifications)),
            created_at: Set(current.created_at),
            updated_at: Set(Some(now)),
        };

        let updated = if existing.is_some() {
            active.update(&*self.db).await?
        } else {
            active.created_at = Set(now);
            active.insert(&*self.db).await?
        };

        info!(user_id = %user_id, "notification preferences updated");
        Ok(updated)
    }

    /// Whether a notification may be sent to `user_id` on `channel`.
    ///
    /// Missing record means yes (toggles are opt-out). A storage failure also
    /// means yes: the gate fails open, because silently dropping a
    /// transactional order email is worse than an unwanted one.
    pub async fn should_notify(&self, user_id: Uuid, channel: NotificationChannel) -> bool {
        match PreferenceEntity::find_by_id(user_id).one(&*self.db).await {
            Ok(Some(record)) => record.allows(channel),
            Ok(None) => true,
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "preference lookup failed; failing open"
                );
                true
            }
        }
    }

    fn gate_recipient(&self, order: &order::Model) -> Option<Uuid> {
        order.buyer().and_then(|buyer| buyer.user_id)
    }

    /// Order-confirmation email, gated on `email_order_updates`.
    #[instrument(skip(self, order, items), fields(code = %order.code))]
    pub async fn dispatch_order_confirmation(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        if let Some(user_id) = self.gate_recipient(order) {
            if !self
                .should_notify(user_id, NotificationChannel::OrderUpdates)
                .await
            {
                debug!(code = %order.code, "order confirmation suppressed by preference");
                return Ok(());
            }
        }

        let shipping = order.shipping_info()?;
        let products: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "quantity": item.quantity,
                    "price": item.unit_price,
                })
            })
            .collect();

        self.outbox
            .enqueue(EmailMessage {
                recipient: shipping.email,
                template: EmailTemplate::OrderConfirmation,
                data: json!({
                    "code": order.code,
                    "first_name": shipping.first_name,
                    "amount": order.amount,
                    "payment_method": order.payment_method,
                    "products": products,
                }),
            })
            .await;
        Ok(())
    }

    /// Verification-confirmation email for the add-on. Deliberately ungated:
    /// the observed product always sends it when verification is purchased.
    #[instrument(skip(self, order), fields(code = %order.code))]
    pub async fn dispatch_verification_confirmation(
        &self,
        order: &order::Model,
    ) -> Result<(), ServiceError> {
        let shipping = order.shipping_info()?;

        self.outbox
            .enqueue(EmailMessage {
                recipient: shipping.email,
                template: EmailTemplate::VerificationConfirmation,
                data: json!({
                    "code": order.code,
                    "first_name": shipping.first_name,
                    "verification_fee": order.verification_fee,
                }),
            })
            .await;
        Ok(())
    }

    /// Status-change email, gated on `email_order_updates`.
    #[instrument(skip(self, order), fields(code = %order.code, new_status = %order.status))]
    pub async fn dispatch_status_update(
        &self,
        order: &order::Model,
        old_status: OrderStatus,
    ) -> Result<(), ServiceError> {
        if let Some(user_id) = self.gate_recipient(order) {
            if !self
                .should_notify(user_id, NotificationChannel::OrderUpdates)
                .await
            {
                debug!(code = %order.code, "status update suppressed by preference");
                return Ok(());
            }
        }

        let shipping = order.shipping_info()?;

        self.outbox
            .enqueue(EmailMessage {
                recipient: shipping.email,
                template: EmailTemplate::OrderStatusUpdate,
                data: json!({
                    "code": order.code,
                    "first_name": shipping.first_name,
                    "old_status": old_status,
                    "new_status": order.status,
                }),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_record_maps_channels() {
        let mut record = PreferenceModel::defaults(Uuid::new_v4(), Utc::now());
        assert!(record.allows(NotificationChannel::OrderUpdates));
        assert!(record.allows(NotificationChannel::Push));

        record.email_order_updates = false;
        assert!(!record.allows(NotificationChannel::OrderUpdates));
        assert!(record.allows(NotificationChannel::ChatMessages));
    }

    struct FlakyEmailSender {
        failures_left: Mutex<u32>,
        delivered: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for FlakyEmailSender {
        async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
            let mut failures = self.failures_left.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(ServiceError::NotificationDispatch("boom".into()));
            }
            self.delivered.lock().await.push(message.clone());
            Ok(())
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            recipient: "buyer@example.com".into(),
            template: EmailTemplate::OrderConfirmation,
            data: json!({"code": "TRG-00000000-AAAAAA"}),
        }
    }

    #[tokio::test]
    async fn outbox_retries_failed_deliveries() {
        let sender = Arc::new(FlakyEmailSender {
            failures_left: Mutex::new(1),
            delivered: Mutex::new(Vec::new()),
        });
        let outbox = EmailOutbox::new(sender.clone());

        outbox.enqueue(message()).await;

        assert_eq!(outbox.drain_once().await, 0);
        assert_eq!(outbox.depth().await, 1);

        assert_eq!(outbox.drain_once().await, 1);
        assert_eq!(outbox.depth().await, 0);
        assert_eq!(sender.delivered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn outbox_drops_after_max_attempts() {
        let sender = Arc::new(FlakyEmailSender {
            failures_left: Mutex::new(u32::MAX),
            delivered: Mutex::new(Vec::new()),
        });
        let outbox = EmailOutbox::new(sender);

        outbox.enqueue(message()).await;

        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            outbox.drain_once().await;
        }

        assert_eq!(outbox.depth().await, 0);
    }
}
