use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user notification switches. Created with all-true defaults at account
/// creation; mutated only by the owning user; consulted read-only by the
/// dispatch path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_preferences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    pub email_order_updates: bool,
    pub email_chat_messages: bool,
    pub email_marketing_emails: bool,
    pub email_review_requests: bool,
    pub email_security_alerts: bool,
    pub push_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// All-true record for users that never touched their settings.
    pub fn defaults(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            email_order_updates: true,
            email_chat_messages: true,
            email_marketing_emails: true,
            email_review_requests: true,
            email_security_alerts: true,
            push_notifications: true,
            created_at: now,
            updated_at: None,
        }
    }
}
