//! Fallback channel that writes alerts to the log.

use async_trait::async_trait;

use super::{Delivery, DeliveryError};

/// Used when no outbound channel is configured.
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        tracing::info!(chat_id = recipient, "Alert: {}", text.replace('\n', " | "));
        Ok(())
    }
}
