use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::policy;
use crate::errors::AppResult;
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::task::{DbTask, TaskStatus};
use crate::models::user::{
    DashboardResponse, DbUser, User, UserRoleUpdateRequest, UserStatusUpdateRequest,
};
use crate::response::ApiResponse;
use crate::routes::auth::fetch_user_by_id;
use crate::routes::authorize;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses(
        (status = 200, description = "All user accounts", body = [User]),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    let actor = auth.actor();
    authorize(policy::can_list_users(&actor), &actor, "list users")?;

    let users = sqlx::query_as::<_, DbUser>(
        "SELECT * FROM users WHERE deleted_at IS NULL ORDER BY created_at",
    )
    .fetch_all(&state.pool)
    .await?;

    let users: Vec<User> = users
        .into_iter()
        .map(User::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(ApiResponse::data(users)))
}

#[utoipa::path(
    get,
    path = "/users/dashboard",
    tag = "Users",
    responses((status = 200, description = "Counters for the calling user", body = DashboardResponse))
)]
pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<ApiResponse<DashboardResponse>>> {
    let projects_owned: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM projects WHERE owner_id = ? AND deleted_at IS NULL",
    )
    .bind(auth.user_id)
    .fetch_one(&state.pool)
    .await?;

    let projects_member_of: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(1) FROM project_members pm
        JOIN projects p ON p.id = pm.project_id
        WHERE pm.user_id = ? AND p.deleted_at IS NULL
        "#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.pool)
    .await?;

    // Overdue is domain logic, not SQL: pull the assigned tasks and reuse the
    // same computation the task reads use.
    let assigned = sqlx::query_as::<_, DbTask>(
        "SELECT * FROM tasks WHERE assignee = ? AND deleted_at IS NULL",
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    let now = utc_now();
    let tasks_assigned = assigned.iter().filter(|t| t.status != TaskStatus::Done).count() as i64;
    let tasks_overdue = assigned.iter().filter(|t| t.is_overdue_at(now)).count() as i64;

    Ok(Json(ApiResponse::data(DashboardResponse {
        projects_owned,
        projects_member_of,
        tasks_assigned,
        tasks_overdue,
    })))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User profile", body = User),
        (status = 403, description = "Only self or an admin"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    let actor = auth.actor();
    let user = fetch_user_by_id(&state.pool, id).await?;
    authorize(policy::can_view_user(&actor, id), &actor, "view this user")?;

    let user: User = user.try_into()?;
    Ok(Json(ApiResponse::data(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}/role",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserRoleUpdateRequest,
    responses(
        (status = 200, description = "Role changed", body = User),
        (status = 403, description = "Admin only, and never on yourself"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserRoleUpdateRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let actor = auth.actor();
    let target = fetch_user_by_id(&state.pool, id).await?;
    authorize(policy::can_change_user_role(&actor, id), &actor, "change this user's role")?;

    let old: User = target.try_into()?;
    let now = utc_now();

    sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(payload.role)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    let user: User = fetch_user_by_id(&state.pool, id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "role_changed", Some(actor.id), &user, Some(&old), Some(context));

    Ok(Json(ApiResponse::data(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}/status",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserStatusUpdateRequest,
    responses(
        (status = 200, description = "Activation toggled", body = User),
        (status = 403, description = "Admin only, and never on yourself"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserStatusUpdateRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let actor = auth.actor();
    let target = fetch_user_by_id(&state.pool, id).await?;
    authorize(policy::can_change_user_status(&actor, id), &actor, "change this user's status")?;

    let old: User = target.try_into()?;
    let now = utc_now();

    sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(payload.is_active)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    let user: User = fetch_user_by_id(&state.pool, id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "status_changed", Some(actor.id), &user, Some(&old), Some(context));

    Ok(Json(ApiResponse::data(user)))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User and their owned projects deleted"),
        (status = 403, description = "Admin only, and never on yourself"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    let actor = auth.actor();
    let target = fetch_user_by_id(&state.pool, id).await?;
    authorize(policy::can_delete_user(&actor, id), &actor, "delete this user")?;

    let deleted: User = target.try_into()?;
    let now = utc_now();

    // One transaction takes the account and everything that hung off it:
    // owned projects with their tasks, roster rows, and assignments on other
    // people's projects.
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE tasks SET deleted_at = ?, updated_at = ?
        WHERE deleted_at IS NULL
          AND project_id IN (SELECT id FROM projects WHERE owner_id = ? AND deleted_at IS NULL)
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE projects SET deleted_at = ?, updated_at = ? WHERE owner_id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM project_members WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE tasks SET assignee = NULL, updated_at = ? WHERE assignee = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "deleted", Some(actor.id), &deleted, None, Some(context));

    Ok(Json(ApiResponse::message("User deleted")))
}
