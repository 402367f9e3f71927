use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{policy, ProjectRelation};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::member::ProjectMember;
use crate::models::project::{
    DbProject, Project, ProjectCreateRequest, ProjectSettings, ProjectUpdateRequest,
};
use crate::response::ApiResponse;
use crate::routes::authorize;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "Projects visible to the caller", body = [Project]))
)]
pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<ApiResponse<Vec<Project>>>> {
    let actor = auth.actor();

    // Admins see every project; everyone else sees what they own or belong to.
    let projects = if actor.is_admin() {
        sqlx::query_as::<_, DbProject>(
            "SELECT * FROM projects WHERE deleted_at IS NULL ORDER BY created_at DESC",
        )
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as::<_, DbProject>(
            r#"
            SELECT * FROM projects
            WHERE deleted_at IS NULL
              AND (owner_id = ?
                   OR EXISTS (SELECT 1 FROM project_members pm
                              WHERE pm.project_id = projects.id AND pm.user_id = ?))
            ORDER BY created_at DESC
            "#,
        )
        .bind(actor.id)
        .bind(actor.id)
        .fetch_all(&state.pool)
        .await?
    };

    let projects: Vec<Project> = projects
        .into_iter()
        .map(Project::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(ApiResponse::data(projects)))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses((status = 201, description = "Project created", body = Project))
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Project>>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("project name must not be empty"));
    }

    let mut settings = ProjectSettings::default();
    if let Some(update) = payload.settings.as_ref() {
        settings.apply(update);
    }

    let now = utc_now();
    let project_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO projects (id, owner_id, name, description,
                              allow_member_task_creation, allow_member_task_assignment,
                              default_task_priority, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(project_id)
    .bind(auth.user_id)
    .bind(payload.name.trim())
    .bind(&payload.description)
    .bind(settings.allow_member_task_creation)
    .bind(settings.allow_member_task_assignment)
    .bind(settings.default_task_priority)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let project: Project = fetch_project(&state.pool, project_id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(auth.user_id), &project, None, Some(context));

    Ok((StatusCode::CREATED, Json(ApiResponse::data(project))))
}

#[utoipa::path(
    get,
    path = "/projects/{project_id}",
    tag = "Projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project detail", body = Project),
        (status = 403, description = "Caller cannot view this project"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Project>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_view_project(&actor, relation), &actor, "view this project")?;

    let project: Project = project.try_into()?;
    Ok(Json(ApiResponse::data(project)))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}",
    tag = "Projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses(
        (status = 200, description = "Project updated", body = Project),
        (status = 403, description = "Only the owner or an admin may update"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<ProjectUpdateRequest>,
) -> AppResult<Json<ApiResponse<Project>>> {
    let actor = auth.actor();
    let mut project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_modify_project(&actor, relation), &actor, "update this project")?;

    let old: Project = project.clone().try_into()?;

    if let Some(name) = payload.name.as_ref() {
        if name.trim().is_empty() {
            return Err(AppError::validation("project name must not be empty"));
        }
        project.name = name.trim().to_string();
    }
    if payload.description.is_some() {
        project.description = payload.description.clone();
    }
    if let Some(update) = payload.settings.as_ref() {
        let mut settings = project.settings();
        settings.apply(update);
        project.allow_member_task_creation = settings.allow_member_task_creation;
        project.allow_member_task_assignment = settings.allow_member_task_assignment;
        project.default_task_priority = settings.default_task_priority;
    }

    let now = utc_now();

    sqlx::query(
        r#"
        UPDATE projects
        SET name = ?, description = ?, allow_member_task_creation = ?,
            allow_member_task_assignment = ?, default_task_priority = ?, updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.allow_member_task_creation)
    .bind(project.allow_member_task_assignment)
    .bind(project.default_task_priority)
    .bind(now)
    .bind(project.id)
    .execute(&state.pool)
    .await?;

    project.updated_at = now;
    let project: Project = project.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "updated", Some(actor.id), &project, Some(&old), Some(context));

    Ok(Json(ApiResponse::data(project)))
}

#[utoipa::path(
    delete,
    path = "/projects/{project_id}",
    tag = "Projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project and its tasks deleted"),
        (status = 403, description = "Only the owner or an admin may delete"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let relation = project_relation(&state.pool, &project, actor.id).await?;
    authorize(policy::can_modify_project(&actor, relation), &actor, "delete this project")?;

    let deleted: Project = project.clone().try_into()?;
    let now = utc_now();

    // The project and every task under it go together.
    let mut tx = state.pool.begin().await?;

    sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE project_id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    let affected = sqlx::query(
        "UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(project_id)
    .execute(&mut *tx)
    .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("project not found"));
    }

    tx.commit().await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "deleted", Some(actor.id), &deleted, None, Some(context));

    Ok(Json(ApiResponse::message("Project deleted")))
}

pub(crate) async fn fetch_project(pool: &SqlitePool, project_id: Uuid) -> AppResult<DbProject> {
    sqlx::query_as::<_, DbProject>("SELECT * FROM projects WHERE id = ? AND deleted_at IS NULL")
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("project not found"))
}

pub(crate) async fn fetch_members(pool: &SqlitePool, project_id: Uuid) -> AppResult<Vec<ProjectMember>> {
    let members = sqlx::query_as::<_, ProjectMember>(
        "SELECT * FROM project_members WHERE project_id = ? ORDER BY joined_at",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(members)
}

/// Resolve the caller's standing on a project from the owner column and the
/// roster.
pub(crate) async fn project_relation(
    pool: &SqlitePool,
    project: &DbProject,
    user_id: Uuid,
) -> AppResult<ProjectRelation> {
    let members = fetch_members(pool, project.id).await?;
    Ok(ProjectRelation::resolve(project.owner_id, &members, user_id))
}
