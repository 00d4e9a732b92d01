//! `MockChannel` — a test double for `Channel`.
//!
//! Useful in unit and integration tests where a real transport is either
//! unavailable or irrelevant.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::{Channel, ChannelError, DeliveryContext, OutboundMessage, Recipient};

/// Behaviour injected into `MockChannel` at construction time.
pub enum MockBehaviour {
    /// Accept every message.
    Deliver,
    /// Fail every delivery with a transport error.
    FailTransport(String),
}

/// One recorded delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub recipient: Recipient,
    pub message: OutboundMessage,
    pub ctx: DeliveryContext,
}

/// A mock channel that records every delivery it receives.
pub struct MockChannel {
    /// Registry key.
    pub name: String,
    /// What the channel will do when `deliver` is called.
    pub behaviour: MockBehaviour,
    /// All deliveries seen by this channel (in call order).
    pub deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl MockChannel {
    /// Create a mock that accepts every message.
    pub fn delivering(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Deliver,
            deliveries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock whose transport always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailTransport(msg.into()),
            deliveries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times `deliver` has been called.
    pub fn call_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Addresses delivered to, in call order.
    pub fn addresses(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.recipient.address.clone())
            .collect()
    }

    /// Snapshot of every recorded delivery.
    pub fn recorded(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        message: &OutboundMessage,
        ctx: &DeliveryContext,
    ) -> Result<(), ChannelError> {
        self.deliveries.lock().unwrap().push(Delivery {
            recipient: recipient.clone(),
            message: message.clone(),
            ctx: ctx.clone(),
        });

        match &self.behaviour {
            MockBehaviour::Deliver => Ok(()),
            MockBehaviour::FailTransport(msg) => Err(ChannelError::Transport(msg.clone())),
        }
    }
}
