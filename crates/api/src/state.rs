use std::sync::Arc;

use engine::host::InMemoryDirectory;
use engine::{AppContext, Listener};

use crate::nonce::NonceSigner;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub listener: Arc<Listener>,
    /// The same directory the context reads from; handlers write through it.
    pub directory: Arc<InMemoryDirectory>,
    pub nonces: Arc<NonceSigner>,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>, directory: Arc<InMemoryDirectory>, nonces: NonceSigner) -> Self {
        Self {
            listener: Arc::new(Listener::with_controller(ctx.clone())),
            ctx,
            directory,
            nonces: Arc::new(nonces),
        }
    }
}
