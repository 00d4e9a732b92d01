//! `engine` crate — workflow model, event pipeline, dispatch and the
//! notification log.

pub mod clock;
pub mod config;
pub mod content;
pub mod context;
pub mod controller;
pub mod defaults;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filters;
pub mod host;
pub mod log;
pub mod models;
pub mod policy;
pub mod receivers;
pub mod store;
pub mod subscriptions;

pub use config::NotificationsConfig;
pub use context::{AppContext, DispatchContext};
pub use controller::{TriggerOptions, TriggerReport, WorkflowController};
pub use dispatcher::{SendNotificationHandler, SEND_NOTIFICATION_HOOK};
pub use error::EngineError;
pub use events::{EventDescriptor, HostHook, Listener};
pub use models::{EventKind, Workflow, WorkflowDraft, WorkflowStatus};
pub use store::WorkflowStore;

#[cfg(test)]
mod fixtures;
