use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::notification_preference::Model as PreferenceModel,
    errors::ServiceError,
    services::notifications::UpdatePreferencesRequest,
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct PreferencesResponse {
    pub user_id: Uuid,
    pub email_order_updates: bool,
    pub email_chat_messages: bool,
    pub email_marketing_emails: bool,
    pub email_review_requests: bool,
    pub email_security_alerts: bool,
    pub push_notifications: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PreferenceModel> for PreferencesResponse {
    fn from(model: PreferenceModel) -> Self {
        Self {
            user_id: model.user_id,
            email_order_updates: model.email_order_updates,
            email_chat_messages: model.email_chat_messages,
            email_marketing_emails: model.email_marketing_emails,
            email_review_requests: model.email_review_requests,
            email_security_alerts: model.email_security_alerts,
            push_notifications: model.push_notifications,
            updated_at: model.updated_at,
        }
    }
}

/// Read a user's notification preferences
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/notification-preferences",
    summary = "Read notification preferences (all-true defaults if never set)",
    params(("user_id" = Uuid, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Preference record", body = ApiResponse<PreferencesResponse>),
    )
)]
pub async fn get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PreferencesResponse>>, ServiceError> {
    let record = state
        .services
        .notifications
        .get_preferences(user_id)
        .await?;
    Ok(Json(ApiResponse::success(PreferencesResponse::from(record))))
}

/// Update a user's notification preferences
#[utoipa::path(
    put,
    path = "/api/v1/users/{user_id}/notification-preferences",
    summary = "Update notification preferences",
    params(("user_id" = Uuid, Path, description = "User identifier")),
    request_body = UpdatePreferencesRequest,
    responses(
        (status = 200, description = "Updated preference record", body = ApiResponse<PreferencesResponse>),
    )
)]
pub async fn update_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<Json<ApiResponse<PreferencesResponse>>, ServiceError> {
    let record = state
        .services
        .notifications
        .update_preferences(user_id, request)
        .await?;
    Ok(Json(ApiResponse::success(PreferencesResponse::from(record))))
}
