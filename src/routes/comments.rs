use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policy;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::comment::{Comment, CommentCreateRequest};
use crate::response::ApiResponse;
use crate::routes::authorize;
use crate::routes::projects::{fetch_project, project_relation};
use crate::routes::tasks::fetch_task;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/projects/{project_id}/tasks/{task_id}/comments",
    tag = "Comments",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Comment thread, oldest first", body = [Comment]),
        (status = 403, description = "Caller cannot view this project"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let _ = fetch_task(&state.pool, project_id, task_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_view_project(&actor, relation), &actor, "view this project")?;

    let comments = fetch_comments(&state.pool, task_id).await?;
    Ok(Json(ApiResponse::data(comments)))
}

#[utoipa::path(
    post,
    path = "/projects/{project_id}/tasks/{task_id}/comments",
    tag = "Comments",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    request_body = CommentCreateRequest,
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 400, description = "Empty comment body"),
        (status = 403, description = "Caller cannot comment here"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CommentCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Comment>>)> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let _ = fetch_task(&state.pool, project_id, task_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_comment(&actor, relation), &actor, "comment on this task")?;

    if payload.body.trim().is_empty() {
        return Err(AppError::validation("comment body must not be empty"));
    }

    let comment_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO task_comments (id, task_id, author_id, body, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(comment_id)
    .bind(task_id)
    .bind(actor.id)
    .bind(payload.body.trim())
    .bind(now)
    .execute(&state.pool)
    .await?;

    let comment = sqlx::query_as::<_, Comment>("SELECT * FROM task_comments WHERE id = ?")
        .bind(comment_id)
        .fetch_one(&state.pool)
        .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(actor.id), &comment, None, Some(context));

    Ok((StatusCode::CREATED, Json(ApiResponse::data(comment))))
}

/// Comments are append-only; `id` breaks created_at ties so the order is
/// stable.
pub(crate) async fn fetch_comments(pool: &SqlitePool, task_id: Uuid) -> AppResult<Vec<Comment>> {
    let comments = sqlx::query_as::<_, Comment>(
        "SELECT * FROM task_comments WHERE task_id = ? ORDER BY created_at, id",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(comments)
}
