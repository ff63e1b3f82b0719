use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    config::PaymentConfig,
    entities::order::{OrderStatus, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Line item forwarded to the hosted payment page.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLineItem {
    pub name: String,
    pub quantity: i32,
    pub unit_price: i64,
}

/// What the buyer intends to pay for. Amounts are minor currency units.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub amount: i64,
    pub description: String,
    pub line_items: Vec<PaymentLineItem>,
}

/// Opaque hosted-payment destination for the buyer's browser.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedirectTarget {
    pub session_id: String,
    pub redirect_url: String,
}

/// Result of routing a payment method selection.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Cash: the caller proceeds directly to order creation.
    Finalize { initial_status: OrderStatus },
    /// Card/wallet: the buyer is redirected; order materialization is
    /// deferred to the provider's success callback.
    Redirect(RedirectTarget),
}

#[derive(Serialize)]
struct ProviderSessionPayload<'a> {
    amount: i64,
    currency: &'a str,
    description: &'a str,
    line_items: &'a [PaymentLineItem],
    success_url: &'a str,
    failure_url: &'a str,
}

#[derive(Deserialize)]
struct ProviderSessionResponse {
    session_id: String,
    redirect_url: String,
}

/// Decides between immediate finalization (cash) and a hosted payment
/// session (card/wallet). Session construction has a hard bounded timeout;
/// its failure is surfaced to the buyer and no order record may exist
/// afterwards.
pub struct PaymentRouter {
    client: reqwest::Client,
    config: PaymentConfig,
    currency: String,
    event_sender: Arc<EventSender>,
}

impl PaymentRouter {
    pub fn new(
        config: PaymentConfig,
        currency: String,
        event_sender: Arc<EventSender>,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build payment client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            currency,
            event_sender,
        })
    }

    #[instrument(skip(self, intent), fields(method = %method, amount = intent.amount))]
    pub async fn route(
        &self,
        method: PaymentMethod,
        intent: &PaymentIntent,
    ) -> Result<RouteOutcome, ServiceError> {
        match method {
            PaymentMethod::Cash => Ok(RouteOutcome::Finalize {
                initial_status: OrderStatus::PendingCashPayment,
            }),
            PaymentMethod::Card | PaymentMethod::Paypal => self
                .create_session(intent)
                .await
                .map(RouteOutcome::Redirect),
        }
    }

    async fn create_session(&self, intent: &PaymentIntent) -> Result<RedirectTarget, ServiceError> {
        let url = format!(
            "{}/v1/payment-sessions",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = ProviderSessionPayload {
            amount: intent.amount,
            currency: &self.currency,
            description: &intent.description,
            line_items: &intent.line_items,
            success_url: &self.config.success_url,
            failure_url: &self.config.failure_url,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                counter!("treg_payment_sessions_failed_total", 1);
                ServiceError::PaymentSession(format!("payment provider unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            counter!("treg_payment_sessions_failed_total", 1);
            return Err(ServiceError::PaymentSession(format!(
                "payment provider rejected the session ({})",
                response.status()
            )));
        }

        let session: ProviderSessionResponse = response.json().await.map_err(|e| {
            counter!("treg_payment_sessions_failed_total", 1);
            ServiceError::PaymentSession(format!("malformed payment provider response: {e}"))
        })?;

        counter!("treg_payment_sessions_created_total", 1);
        info!(session_id = %session.session_id, "payment session created");

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentSessionCreated {
                session_id: session.session_id.clone(),
                amount: intent.amount,
            })
            .await
        {
            warn!(error = %e, "failed to send payment session event");
        }

        Ok(RedirectTarget {
            session_id: session.session_id,
            redirect_url: session.redirect_url,
        })
    }
}
