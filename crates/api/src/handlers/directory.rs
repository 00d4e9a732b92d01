//! Directory sync: the host pushes the posts, users and comments the
//! pipeline reads.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::debug;

use engine::host::{EditorialComment, Post, User};

use super::AppState;
use crate::error::{ok, ApiError, Envelope};
use crate::nonce::{verify_request, ACTION_DIRECTORY};

fn check_id(kind: &str, path_id: i64, body_id: i64) -> Result<(), ApiError> {
    if path_id != body_id {
        return Err(ApiError::BadRequest(format!("{kind} id {body_id} does not match path id {path_id}")));
    }
    Ok(())
}

pub async fn put_post(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(post): Json<Post>,
) -> Result<Json<Envelope<Post>>, ApiError> {
    verify_request(&state, &headers, ACTION_DIRECTORY)?;
    check_id("post", id, post.id)?;
    debug!(post_id = id, "directory post synced");
    state.directory.upsert_post(post.clone());
    Ok(ok(post))
}

pub async fn put_user(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(user): Json<User>,
) -> Result<Json<Envelope<User>>, ApiError> {
    verify_request(&state, &headers, ACTION_DIRECTORY)?;
    check_id("user", id, user.id)?;
    debug!(user_id = id, "directory user synced");
    state.directory.upsert_user(user.clone());
    Ok(ok(user))
}

pub async fn put_comment(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(comment): Json<EditorialComment>,
) -> Result<Json<Envelope<EditorialComment>>, ApiError> {
    verify_request(&state, &headers, ACTION_DIRECTORY)?;
    check_id("comment", id, comment.id)?;
    state.directory.upsert_comment(comment.clone());
    Ok(ok(comment))
}
