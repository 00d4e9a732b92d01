use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use engine::models::WorkflowId;
use engine::{Workflow, WorkflowDraft, WorkflowStatus, WorkflowStore};

use super::AppState;
use crate::error::{ok, ApiError, Envelope};
use crate::nonce::{verify_manager, ACTION_WORKFLOWS};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: WorkflowId,
    /// `false` when the workflow was only moved to the trash.
    pub deleted: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Vec<Workflow>>>, ApiError> {
    verify_manager(&state, &headers, ACTION_WORKFLOWS)?;
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<WorkflowStatus>().map_err(ApiError::BadRequest)?),
        None => None,
    };
    let workflows = WorkflowStore::new(&state.ctx.pool).list(status).await?;
    Ok(ok(workflows))
}

pub async fn get(
    Path(id): Path<WorkflowId>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Workflow>>, ApiError> {
    verify_manager(&state, &headers, ACTION_WORKFLOWS)?;
    Ok(ok(WorkflowStore::new(&state.ctx.pool).get(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<WorkflowDraft>,
) -> Result<(StatusCode, Json<Envelope<Workflow>>), ApiError> {
    let actor = verify_manager(&state, &headers, ACTION_WORKFLOWS)?;
    let workflow = WorkflowStore::new(&state.ctx.pool)
        .with_channels(&state.ctx.channels)
        .create(&draft)
        .await?;
    info!(workflow_id = workflow.id, actor_id = actor.id, "workflow created");
    Ok((StatusCode::CREATED, ok(workflow)))
}

pub async fn update(
    Path(id): Path<WorkflowId>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<WorkflowDraft>,
) -> Result<Json<Envelope<Workflow>>, ApiError> {
    let actor = verify_manager(&state, &headers, ACTION_WORKFLOWS)?;
    let workflow = WorkflowStore::new(&state.ctx.pool)
        .with_channels(&state.ctx.channels)
        .update(id, &draft)
        .await?;
    info!(workflow_id = id, actor_id = actor.id, "workflow updated");
    Ok(ok(workflow))
}

/// Trashes by default; `?force=true` deletes permanently.
pub async fn delete(
    Path(id): Path<WorkflowId>,
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Deleted>>, ApiError> {
    let actor = verify_manager(&state, &headers, ACTION_WORKFLOWS)?;
    let store = WorkflowStore::new(&state.ctx.pool);
    if params.force {
        store.delete(id).await?;
    } else {
        store.trash(id).await?;
    }
    info!(workflow_id = id, actor_id = actor.id, force = params.force, "workflow removed");
    Ok(ok(Deleted { id, deleted: params.force }))
}
