pub mod directory;
pub mod hooks;
pub mod log;
pub mod subscriptions;
pub mod workflows;

pub use crate::state::AppState;
