use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::entities::order::OrderStatus;

/// Domain events emitted by the order core. Consumed in-process by the
/// event processor task; best-effort by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        code: String,
        amount: i64,
    },
    OrderStatusChanged {
        code: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentSessionCreated {
        session_id: String,
        amount: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel and logs each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated { code, amount } => {
                info!(code = %code, amount = amount, "event: order created");
            }
            Event::OrderStatusChanged {
                code,
                old_status,
                new_status,
            } => {
                info!(
                    code = %code,
                    old_status = %old_status,
                    new_status = %new_status,
                    "event: order status changed"
                );
            }
            Event::PaymentSessionCreated { session_id, amount } => {
                info!(session_id = %session_id, amount = amount, "event: payment session created");
            }
        }
    }
}
