//! Alert fanout to subscribers.
//!
//! A [`Notifier`] resolves which subscribers care about an endpoint and hands
//! the message to a [`Delivery`] channel once per recipient. Deliveries run
//! concurrently and each failure is logged and dropped on its own.

mod logging;
mod message;
mod telegram;

pub use logging::LogDelivery;
pub use message::*;
pub use telegram::TelegramDelivery;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;

use crate::db::Subscriber;

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("{0}")]
    Other(String),
}

/// Outbound channel that sends text to one recipient.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Every subscriber following everything plus those following `endpoint_id`.
pub fn resolve_audience(subscribers: &[Subscriber], endpoint_id: i64) -> Vec<&Subscriber> {
    subscribers
        .iter()
        .filter(|s| s.is_interested_in(endpoint_id))
        .collect()
}

/// Best-effort multi-recipient dispatcher.
pub struct Notifier {
    delivery: Arc<dyn Delivery>,
    concurrency: usize,
}

impl Notifier {
    pub fn new(delivery: Arc<dyn Delivery>, concurrency: usize) -> Self {
        Self {
            delivery,
            concurrency: concurrency.max(1),
        }
    }

    pub fn channel_name(&self) -> &'static str {
        self.delivery.name()
    }

    /// Send `message` to every interested subscriber.
    ///
    /// Returns the number of recipients attempted, not the number reached.
    pub async fn notify(&self, endpoint_id: i64, message: &str, subscribers: &[Subscriber]) -> usize {
        let audience = resolve_audience(subscribers, endpoint_id);
        let attempted = audience.len();

        if attempted == 0 {
            tracing::debug!(endpoint_id, "No subscribers for alert");
            return 0;
        }

        let delivery = &self.delivery;
        stream::iter(audience)
            .for_each_concurrent(self.concurrency, |subscriber| async move {
                match delivery.deliver(&subscriber.chat_id, message).await {
                    Ok(()) => {
                        tracing::debug!(channel = delivery.name(), chat_id = %subscriber.chat_id, "Alert delivered");
                    }
                    Err(e) => {
                        tracing::warn!(
                            channel = delivery.name(),
                            chat_id = %subscriber.chat_id,
                            error = %e,
                            "Failed to deliver alert"
                        );
                    }
                }
            })
            .await;

        attempted
    }
}
