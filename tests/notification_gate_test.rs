//! Preference gate tests: opt-out defaults, per-channel gating, the
//! deliberately ungated verification email, and fail-open on storage errors.

mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use common::{
    cart_item, checkout_session_for_buyer, response_json, FailingEmailSender, TestApp,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use serde_json::json;
use treg_api::services::notifications::EmailTemplate;
use uuid::Uuid;

#[tokio::test]
async fn preferences_default_to_all_true() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/users/{user_id}/notification-preferences"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    let data = &body["data"];
    for field in [
        "email_order_updates",
        "email_chat_messages",
        "email_marketing_emails",
        "email_review_requests",
        "email_security_alerts",
        "push_notifications",
    ] {
        assert_eq!(data[field], true, "{field} should default to true");
    }
}

#[tokio::test]
async fn preference_updates_are_partial_and_persisted() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/users/{user_id}/notification-preferences"),
            Some(json!({ "email_order_updates": false })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/users/{user_id}/notification-preferences"),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["email_order_updates"], false);
    assert_eq!(body["data"]["email_chat_messages"], true);
}

#[tokio::test]
async fn opted_out_buyers_skip_the_confirmation_but_not_the_verification_email() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/users/{user_id}/notification-preferences"),
            Some(json!({ "email_order_updates": false })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = checkout_session_for_buyer(
        vec![cart_item("Leather jacket", 85_000, 1)],
        true,
        user_id,
    );
    let response = app
        .request(Method::POST, "/api/v1/checkout/cash", Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    app.drain_outbox().await;
    let emails = app.sent_emails().await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].template, EmailTemplate::VerificationConfirmation);
}

#[tokio::test]
async fn buyers_with_default_preferences_get_both_emails() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let payload = checkout_session_for_buyer(
        vec![cart_item("Leather jacket", 85_000, 1)],
        true,
        user_id,
    );
    let response = app
        .request(Method::POST, "/api/v1/checkout/cash", Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    app.drain_outbox().await;
    let templates: Vec<EmailTemplate> = app
        .sent_emails()
        .await
        .into_iter()
        .map(|m| m.template)
        .collect();
    assert_eq!(
        templates,
        vec![
            EmailTemplate::OrderConfirmation,
            EmailTemplate::VerificationConfirmation
        ]
    );
}

#[tokio::test]
async fn broken_preference_storage_fails_open() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    // Break the preference table out from under the gate.
    app.state
        .db
        .execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "DROP TABLE notification_preferences;".to_string(),
        ))
        .await
        .expect("drop preferences table");

    let payload = checkout_session_for_buyer(
        vec![cart_item("Leather jacket", 85_000, 1)],
        false,
        user_id,
    );
    let response = app
        .request(Method::POST, "/api/v1/checkout/cash", Some(payload))
        .await;

    // The order is still created and the confirmation is still attempted.
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let code = body["data"]["code"].as_str().unwrap().to_string();

    app.drain_outbox().await;
    let emails = app.sent_emails().await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].template, EmailTemplate::OrderConfirmation);

    let tracking = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{code}/tracking"),
            None,
        )
        .await;
    assert_eq!(tracking.status(), StatusCode::OK);
}

#[tokio::test]
async fn email_delivery_failure_never_blocks_checkout() {
    let app = TestApp::with_email_sender(Arc::new(FailingEmailSender)).await;

    let payload = checkout_session_for_buyer(
        vec![cart_item("Leather jacket", 85_000, 1)],
        true,
        Uuid::new_v4(),
    );
    let response = app
        .request(Method::POST, "/api/v1/checkout/cash", Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let code = body["data"]["code"].as_str().unwrap().to_string();

    // Every delivery attempt fails, yet the order remains intact.
    assert_eq!(app.drain_outbox().await, 0);

    let tracking = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{code}/tracking"),
            None,
        )
        .await;
    assert_eq!(tracking.status(), StatusCode::OK);
}
