use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use engine::events::HookOutcome;
use engine::HostHook;

use super::AppState;
use crate::error::{ok, ApiError, Envelope};
use crate::nonce::{verify_request, ACTION_HOOK};

/// Host lifecycle callback ingress.  Pipeline failures are logged by the
/// listener and show up as an empty report, never as an error response.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(hook): Json<HostHook>,
) -> Result<Json<Envelope<HookOutcome>>, ApiError> {
    verify_request(&state, &headers, ACTION_HOOK)?;
    let outcome = state.listener.handle(hook).await;
    Ok(ok(outcome))
}
