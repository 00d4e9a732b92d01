//! `channels` crate — the `Channel` trait and built-in delivery backends.
//!
//! Every delivery backend, built-in or third-party, implements
//! [`Channel`].  The engine dispatches rendered notifications through this
//! trait object.

pub mod error;
pub mod traits;
pub mod email;
pub mod mock;

pub use error::ChannelError;
pub use traits::{Channel, DeliveryContext, OutboundMessage, Recipient};
