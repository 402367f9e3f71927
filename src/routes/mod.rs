pub mod auth;
pub mod comments;
pub mod health;
pub mod members;
pub mod projects;
pub mod tasks;
pub mod users;

use crate::authz::Actor;
use crate::errors::{AppError, AppResult};

/// Turn a policy verdict into a response: `false` becomes a 403 and leaves a
/// debug trace of who was denied what.
pub(crate) fn authorize(allowed: bool, actor: &Actor, action: &str) -> AppResult<()> {
    if allowed {
        return Ok(());
    }

    tracing::debug!(actor_id = %actor.id, action, "permission denied");
    Err(AppError::forbidden(format!("not allowed to {action}")))
}
