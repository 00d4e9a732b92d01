//! Request nonces.
//!
//! A nonce is the hex HMAC-SHA256 of `action:user_id` under the server
//! secret.  Mutating endpoints read it from `X-Planner-Nonce` and the acting
//! user from `X-Planner-User`, and reject the request before doing any work.

use axum::http::HeaderMap;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use engine::host::User;
use engine::models::UserId;

use crate::error::ApiError;
use crate::state::AppState;

pub const NONCE_HEADER: &str = "x-planner-nonce";
pub const USER_HEADER: &str = "x-planner-user";

pub const ACTION_HOOK: &str = "planner_hook";
pub const ACTION_DIRECTORY: &str = "planner_directory_sync";
pub const ACTION_WORKFLOWS: &str = "planner_manage_workflows";
pub const ACTION_LOG: &str = "planner_notifications_log";

/// Capability needed to manage workflows and the log.
pub const MANAGE_CAPABILITY: &str = "manage_options";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct NonceSigner {
    mac: HmacSha256,
}

impl NonceSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Ok(Self { mac: HmacSha256::new_from_slice(secret.as_ref())? })
    }

    pub fn sign(&self, action: &str, user_id: UserId) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{action}:{user_id}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison.
    pub fn verify(&self, action: &str, user_id: UserId, nonce: &str) -> bool {
        let Ok(raw) = hex::decode(nonce.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(format!("{action}:{user_id}").as_bytes());
        mac.verify_slice(&raw).is_ok()
    }
}

/// Check the nonce for `action` and return the acting user id.
pub fn verify_request(state: &AppState, headers: &HeaderMap, action: &str) -> Result<UserId, ApiError> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<UserId>().ok())
        .ok_or(ApiError::InvalidNonce)?;
    let nonce = headers
        .get(NONCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidNonce)?;

    if !state.nonces.verify(action, user_id, nonce) {
        return Err(ApiError::InvalidNonce);
    }
    Ok(user_id)
}

/// Verify the nonce, then require the actor to hold `manage_options`.
pub fn verify_manager(state: &AppState, headers: &HeaderMap, action: &str) -> Result<User, ApiError> {
    let actor_id = verify_request(state, headers, action)?;
    let actor = state
        .directory
        .get_user(actor_id)
        .ok_or_else(|| ApiError::Forbidden(format!("unknown user {actor_id}")))?;
    if !actor.can(MANAGE_CAPABILITY) {
        return Err(ApiError::Forbidden(format!("user {actor_id} cannot manage notifications")));
    }
    Ok(actor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonces_are_bound_to_action_and_user() {
        let signer = NonceSigner::new("s3cret").unwrap();
        let nonce = signer.sign(ACTION_LOG, 4);

        assert!(signer.verify(ACTION_LOG, 4, &nonce));
        assert!(!signer.verify(ACTION_LOG, 5, &nonce));
        assert!(!signer.verify(ACTION_WORKFLOWS, 4, &nonce));
        assert!(!signer.verify(ACTION_LOG, 4, "zz"));

        let other = NonceSigner::new("different").unwrap();
        assert!(!other.verify(ACTION_LOG, 4, &nonce));
    }
}
