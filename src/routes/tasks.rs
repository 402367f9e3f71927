use axum::extract::{Path, Query, State};
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
use crate::models::project::DbProject;
use crate::models::task::{
    DbTask, Task, TaskAssignRequest, TaskCreateRequest, TaskDetail, TaskListQuery, TaskStatus,
    TaskStatusUpdateRequest, TaskUpdateRequest,
};
use crate::response::ApiResponse;
use crate::routes::authorize;
use crate::routes::comments::fetch_comments;
use crate::routes::projects::{fetch_members, fetch_project};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/projects/{project_id}/tasks",
    tag = "Tasks",
    params(("project_id" = Uuid, Path, description = "Project id"), TaskListQuery),
    responses(
        (status = 200, description = "Tasks in the project", body = [Task]),
        (status = 403, description = "Caller cannot view this project"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Query(filter): Query<TaskListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Task>>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);
    authorize(policy::can_view_project(&actor, relation), &actor, "view this project")?;

    let mut query = sqlx::QueryBuilder::new("SELECT * FROM tasks WHERE project_id = ");
    query.push_bind(project_id);
    query.push(" AND deleted_at IS NULL");
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
    if let Some(assignee) = filter.assignee {
        query.push(" AND assignee = ");
        query.push_bind(assignee);
    }
    query.push(" ORDER BY created_at DESC");

    let tasks = query
        .build_query_as::<DbTask>()
        .fetch_all(&state.pool)
        .await?;

    let tasks: Vec<Task> = tasks
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(ApiResponse::data(tasks)))
}

#[utoipa::path(
    post,
    path = "/projects/{project_id}/tasks",
    tag = "Tasks",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Assignee is not a participant"),
        (status = 403, description = "Caller cannot create tasks here"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Task>>)> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);

    let settings = project.settings();
    authorize(
        policy::can_create_task(&actor, relation, &settings),
        &actor,
        "create tasks in this project",
    )?;

    if payload.title.trim().is_empty() {
        return Err(AppError::validation("task title must not be empty"));
    }

    // Creating a task pre-assigned counts as assigning.
    if let Some(assignee) = payload.assignee {
        authorize(
            policy::can_assign_task(&actor, relation, &settings),
            &actor,
            "assign tasks in this project",
        )?;
        ensure_assignable(&project, &members, assignee)?;
    }

    let now = utc_now();
    let task_id = Uuid::new_v4();
    let status = payload.status.unwrap_or(TaskStatus::Todo);
    let priority = payload.priority.unwrap_or(settings.default_task_priority);
    let tags = payload.tags.unwrap_or_default();
    let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"
        INSERT INTO tasks (id, project_id, title, description, status, priority,
                           assignee, created_by, due_date, tags, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task_id)
    .bind(project_id)
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(status)
    .bind(priority)
    .bind(payload.assignee)
    .bind(actor.id)
    .bind(payload.due_date)
    .bind(&tags_json)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let task: Task = fetch_task(&state.pool, project_id, task_id).await?.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "created", Some(actor.id), &task, None, Some(context));

    Ok((StatusCode::CREATED, Json(ApiResponse::data(task))))
}

#[utoipa::path(
    get,
    path = "/projects/{project_id}/tasks/{task_id}",
    tag = "Tasks",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task with its comments", body = TaskDetail),
        (status = 403, description = "Caller cannot view this project"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<TaskDetail>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let task = fetch_task(&state.pool, project_id, task_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);
    authorize(policy::can_view_project(&actor, relation), &actor, "view this project")?;

    let comments = fetch_comments(&state.pool, task_id).await?;
    let task: Task = task.try_into()?;

    Ok(Json(ApiResponse::data(TaskDetail { task, comments })))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}/tasks/{task_id}",
    tag = "Tasks",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 403, description = "Caller cannot edit this task"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<ApiResponse<Task>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let mut task = fetch_task(&state.pool, project_id, task_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);
    authorize(policy::can_edit_task(&actor, relation), &actor, "edit this task")?;

    let old: Task = task.clone().try_into()?;

    if let Some(title) = payload.title.as_ref() {
        if title.trim().is_empty() {
            return Err(AppError::validation("task title must not be empty"));
        }
        task.title = title.trim().to_string();
    }
    if payload.description.is_some() {
        task.description = payload.description.clone();
    }
    if let Some(priority) = payload.priority {
        task.priority = priority;
    }
    if payload.due_date.is_some() {
        task.due_date = payload.due_date;
    }
    if let Some(tags) = payload.tags.as_ref() {
        task.tags = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
    }

    let now = utc_now();

    sqlx::query(
        r#"
        UPDATE tasks
        SET title = ?, description = ?, priority = ?, due_date = ?, tags = ?, updated_at = ?
        WHERE id = ? AND project_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.priority)
    .bind(task.due_date)
    .bind(&task.tags)
    .bind(now)
    .bind(task_id)
    .bind(project_id)
    .execute(&state.pool)
    .await?;

    task.updated_at = now;
    let task: Task = task.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "updated", Some(actor.id), &task, Some(&old), Some(context));

    Ok(Json(ApiResponse::data(task)))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}/tasks/{task_id}/status",
    tag = "Tasks",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    request_body = TaskStatusUpdateRequest,
    responses(
        (status = 200, description = "Status changed", body = Task),
        (status = 403, description = "Only the assignee, a lead, or an admin moves this task"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn update_task_status(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<TaskStatusUpdateRequest>,
) -> AppResult<Json<ApiResponse<Task>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let mut task = fetch_task(&state.pool, project_id, task_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);
    authorize(
        policy::can_change_task_status(&actor, relation, task.assignee),
        &actor,
        "change this task's status",
    )?;

    let old: Task = task.clone().try_into()?;
    let now = utc_now();

    sqlx::query(
        "UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND project_id = ? AND deleted_at IS NULL",
    )
    .bind(payload.status)
    .bind(now)
    .bind(task_id)
    .bind(project_id)
    .execute(&state.pool)
    .await?;

    task.status = payload.status;
    task.updated_at = now;
    let task: Task = task.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "status_changed", Some(actor.id), &task, Some(&old), Some(context));

    Ok(Json(ApiResponse::data(task)))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}/tasks/{task_id}/assignee",
    tag = "Tasks",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    request_body = TaskAssignRequest,
    responses(
        (status = 200, description = "Assignment changed", body = Task),
        (status = 400, description = "Assignee is not a participant"),
        (status = 403, description = "Caller cannot assign tasks here"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn update_task_assignee(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<TaskAssignRequest>,
) -> AppResult<Json<ApiResponse<Task>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let mut task = fetch_task(&state.pool, project_id, task_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);
    authorize(
        policy::can_assign_task(&actor, relation, &project.settings()),
        &actor,
        "assign tasks in this project",
    )?;

    if let Some(assignee) = payload.assignee {
        ensure_assignable(&project, &members, assignee)?;
    }

    let old: Task = task.clone().try_into()?;
    let now = utc_now();

    sqlx::query(
        "UPDATE tasks SET assignee = ?, updated_at = ? WHERE id = ? AND project_id = ? AND deleted_at IS NULL",
    )
    .bind(payload.assignee)
    .bind(now)
    .bind(task_id)
    .bind(project_id)
    .execute(&state.pool)
    .await?;

    task.assignee = payload.assignee;
    task.updated_at = now;
    let task: Task = task.try_into()?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "assigned", Some(actor.id), &task, Some(&old), Some(context));

    Ok(Json(ApiResponse::data(task)))
}

#[utoipa::path(
    delete,
    path = "/projects/{project_id}/tasks/{task_id}",
    tag = "Tasks",
    params(
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task deleted"),
        (status = 403, description = "Only the owner, the creator, or an admin deletes"),
        (status = 404, description = "Project or task not found")
    )
)]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<()>>> {
    let actor = auth.actor();
    let project = fetch_project(&state.pool, project_id).await?;
    let task = fetch_task(&state.pool, project_id, task_id).await?;
    let members = fetch_members(&state.pool, project_id).await?;
    let relation = ProjectRelation::resolve(project.owner_id, &members, actor.id);
    authorize(
        policy::can_delete_task(&actor, relation, task.created_by),
        &actor,
        "delete this task",
    )?;

    let deleted: Task = task.clone().try_into()?;
    let now = utc_now();

    sqlx::query(
        "UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ? AND project_id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(task_id)
    .bind(project_id)
    .execute(&state.pool)
    .await?;

    let context = RequestContext::from_headers(&headers);
    log_activity(&state.event_bus, "deleted", Some(actor.id), &deleted, None, Some(context));

    Ok(Json(ApiResponse::message("Task deleted")))
}

/// An assignee must participate in the project; pointing a task at anyone
/// else is a payload error, not a permission problem.
fn ensure_assignable(
    project: &DbProject,
    members: &[ProjectMember],
    assignee: Uuid,
) -> AppResult<()> {
    let participates =
        assignee == project.owner_id || members.iter().any(|m| m.user_id == assignee);
    if !participates {
        return Err(AppError::validation(
            "assignee must be the project owner or a member",
        ));
    }
    Ok(())
}

pub(crate) async fn fetch_task(
    pool: &SqlitePool,
    project_id: Uuid,
    task_id: Uuid,
) -> AppResult<DbTask> {
    sqlx::query_as::<_, DbTask>(
        "SELECT * FROM tasks WHERE id = ? AND project_id = ? AND deleted_at IS NULL",
    )
    .bind(task_id)
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("task not found"))
}
