use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, comments, health, members, projects, tasks, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (event_bus, rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let user_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/dashboard", get(users::dashboard))
        .route("/:id", get(users::get_user))
        .route("/:id", delete(users::delete_user))
        .route("/:id/role", put(users::update_role))
        .route("/:id/status", put(users::update_status));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects))
        .route("/", post(projects::create_project))
        .route("/:project_id", get(projects::get_project))
        .route("/:project_id", put(projects::update_project))
        .route("/:project_id", delete(projects::delete_project));

    // The roster is scoped to a project: /projects/:project_id/members
    let member_routes = Router::new()
        .route("/", get(members::list_members))
        .route("/", post(members::add_member))
        .route("/:user_id", put(members::update_member_role))
        .route("/:user_id", delete(members::remove_member));

    let task_routes = Router::new()
        .route("/", get(tasks::list_tasks))
        .route("/", post(tasks::create_task))
        .route("/:task_id", get(tasks::get_task))
        .route("/:task_id", put(tasks::update_task))
        .route("/:task_id", delete(tasks::delete_task))
        .route("/:task_id/status", put(tasks::update_task_status))
        .route("/:task_id/assignee", put(tasks::update_task_assignee));

    let comment_routes = Router::new()
        .route("/", get(comments::list_comments))
        .route("/", post(comments::add_comment));

    let router = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/projects", project_routes)
        .nest("/projects/:project_id/members", member_routes)
        .nest("/projects/:project_id/tasks", task_routes)
        .nest("/projects/:project_id/tasks/:task_id/comments", comment_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
