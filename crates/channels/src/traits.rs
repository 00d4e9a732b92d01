//! The `Channel` trait — the contract every delivery backend must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ChannelError;

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Delivery address (an e-mail address for the built-in channel).
    pub address: String,
    pub name: Option<String>,
    /// Set when the recipient is a known user.
    pub user_id: Option<i64>,
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub subject: String,
    pub body: String,
}

/// Identifies the dispatch a delivery belongs to.
///
/// Defined here (in the channels crate) so both the engine and individual
/// channel implementations can import it without a circular dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryContext {
    pub workflow_id: i64,
    pub post_id: i64,
    /// Event name that triggered the dispatch.
    pub event: String,
    /// Whether this delivery runs from a scheduled task.
    pub is_async: bool,
}

/// The core channel trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Registry key, stored in workflow channel preferences and log rows.
    fn name(&self) -> &str;

    /// Human readable label.
    fn label(&self) -> &str {
        self.name()
    }

    /// Deliver one message to one recipient.
    async fn deliver(
        &self,
        recipient: &Recipient,
        message: &OutboundMessage,
        ctx: &DeliveryContext,
    ) -> Result<(), ChannelError>;
}
