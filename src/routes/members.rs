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
use crate::models::member::{
    MemberAddRequest, MemberRoleUpdateRequest, ProjectMember, ProjectMemberDetail, ProjectRole,
};
use crate::response::ApiResponse;
use crate::routes::authorize;
use crate::routes::projects::{fetch_project, project_relation};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/projects/{project_id}/members",
    tag = "Members",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project roster", body = [ProjectMemberDetail]),
        (status = 403, description = "Caller cannot view this project"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<ProjectMemberDetail>>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_view_project(&actor, relation), &actor, "view this project")?;

    let members = fetch_roster(&state.pool, project_id).await?;
    Ok(Json(ApiResponse::data(members)))
}

#[utoipa::path(
    post,
    path = "/projects/{project_id}/members",
    tag = "Members",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = MemberAddRequest,
    responses(
        (status = 201, description = "Member added", body = ProjectMemberDetail),
        (status = 400, description = "The owner cannot be added to the roster"),
        (status = 403, description = "Only the owner or an admin manages the roster"),
        (status = 404, description = "Project or user not found"),
        (status = 409, description = "Already a member")
    )
)]
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<MemberAddRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ProjectMemberDetail>>)> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_manage_members(&actor, relation), &actor, "manage this project's members")?;

    // The user must exist and must not be the owner, who participates by
    // ownership alone.
    let user_exists: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE id = ? AND deleted_at IS NULL")
            .bind(payload.user_id)
            .fetch_one(&state.pool)
            .await?;
    if user_exists == 0 {
        return Err(AppError::not_found("user not found"));
    }
    if payload.user_id == project.owner_id {
        return Err(AppError::validation("the project owner is not a roster member"));
    }

    let already: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM project_members WHERE project_id = ? AND user_id = ?",
    )
    .bind(project_id)
    .bind(payload.user_id)
    .fetch_one(&state.pool)
    .await?;
    if already > 0 {
        return Err(AppError::conflict("user is already a member of this project"));
    }

    let role = payload.role.unwrap_or(ProjectRole::Member);
    let joined_at = utc_now();

    sqlx::query(
        "INSERT INTO project_members (project_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(payload.user_id)
    .bind(role)
    .bind(joined_at)
    .execute(&state.pool)
    .await?;

    let member = ProjectMember {
        project_id,
        user_id: payload.user_id,
        role,
        joined_at,
    };
    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "added", Some(actor.id), &member, None, Some(context));

    let detail = fetch_roster_entry(&state.pool, project_id, payload.user_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::data(detail))))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}/members/{user_id}",
    tag = "Members",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    request_body = MemberRoleUpdateRequest,
    responses(
        (status = 200, description = "Member role updated", body = ProjectMemberDetail),
        (status = 403, description = "Only the owner or an admin manages the roster"),
        (status = 404, description = "Project or member not found")
    )
)]
pub async fn update_member_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<MemberRoleUpdateRequest>,
) -> AppResult<Json<ApiResponse<ProjectMemberDetail>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_manage_members(&actor, relation), &actor, "manage this project's members")?;

    let old = fetch_member_row(&state.pool, project_id, user_id).await?;

    sqlx::query("UPDATE project_members SET role = ? WHERE project_id = ? AND user_id = ?")
        .bind(payload.role)
        .bind(project_id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    let mut updated = old.clone();
    updated.role = payload.role;
    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "role_changed", Some(actor.id), &updated, Some(&old), Some(context));

    let detail = fetch_roster_entry(&state.pool, project_id, user_id).await?;
    Ok(Json(ApiResponse::data(detail)))
}

#[utoipa::path(
    delete,
    path = "/projects/{project_id}/members/{user_id}",
    tag = "Members",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    responses(
        (status = 200, description = "Member removed"),
        (status = 403, description = "Denied; the owner can never be removed"),
        (status = 404, description = "Project or member not found")
    )
)]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;

    // Target-is-owner is part of the rule, not a roster lookup: the owner is
    // never on the roster, and their removal must be denied, not 404ed.
    let target_is_owner = user_id == project.owner_id;
    authorize(
        policy::can_remove_member(&actor, relation, target_is_owner),
        &actor,
        "remove this member",
    )?;

    let member = fetch_member_row(&state.pool, project_id, user_id).await?;

    sqlx::query("DELETE FROM project_members WHERE project_id = ? AND user_id = ?")
        .bind(project_id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "removed", Some(actor.id), &member, None, Some(context));

    Ok(Json(ApiResponse::message("Member removed")))
}

async fn fetch_member_row(
    pool: &SqlitePool,
    project_id: Uuid,
    user_id: Uuid,
) -> AppResult<ProjectMember> {
    sqlx::query_as::<_, ProjectMember>(
        "SELECT * FROM project_members WHERE project_id = ? AND user_id = ?",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("member not found"))
}

async fn fetch_roster(pool: &SqlitePool, project_id: Uuid) -> AppResult<Vec<ProjectMemberDetail>> {
    let roster = sqlx::query_as::<_, ProjectMemberDetail>(
        r#"
        SELECT pm.user_id, u.name, u.email, pm.role, pm.joined_at
        FROM project_members pm
        JOIN users u ON u.id = pm.user_id
        WHERE pm.project_id = ? AND u.deleted_at IS NULL
        ORDER BY pm.joined_at
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(roster)
}

async fn fetch_roster_entry(
    pool: &SqlitePool,
    project_id: Uuid,
    user_id: Uuid,
) -> AppResult<ProjectMemberDetail> {
    sqlx::query_as::<_, ProjectMemberDetail>(
        r#"
        SELECT pm.user_id, u.name, u.email, pm.role, pm.joined_at
        FROM project_members pm
        JOIN users u ON u.id = pm.user_id
        WHERE pm.project_id = ? AND pm.user_id = ? AND u.deleted_at IS NULL
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("member not found"))
}
