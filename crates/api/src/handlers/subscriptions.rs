use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use engine::models::{PostId, UserId};
use engine::subscriptions::{Subscriptions, SUBSCRIPTION_ACTION};

use super::AppState;
use crate::error::{ok, ApiError, Envelope};
use crate::nonce::verify_request;

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub post_id: PostId,
    /// Defaults to the acting user.
    pub user_id: Option<UserId>,
    pub follow: bool,
}

#[derive(Debug, Serialize)]
pub struct ToggleResult {
    pub post_id: PostId,
    pub user_id: UserId,
    pub following: bool,
}

pub async fn toggle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<Envelope<ToggleResult>>, ApiError> {
    let actor_id = verify_request(&state, &headers, SUBSCRIPTION_ACTION)?;
    let user_id = request.user_id.unwrap_or(actor_id);

    let following = Subscriptions::new(state.ctx.clone())
        .toggle(request.post_id, user_id, request.follow, actor_id)
        .await?;

    Ok(ok(ToggleResult { post_id: request.post_id, user_id, following }))
}
