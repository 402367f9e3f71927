use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;

use taskboard::create_app;

async fn setup() -> Result<(TempDir, Router, SqlitePool)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    Ok((dir, app, pool))
}

async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let payload = json!({"name": name, "email": email, "password": "password123"});
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    anyhow::ensure!(resp.status() == StatusCode::CREATED, "register failed for {}", email);
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    let token = value
        .pointer("/data/token")
        .and_then(|v| v.as_str())
        .context("missing token")?
        .to_string();
    let user_id = value
        .pointer("/data/user/id")
        .and_then(|v| v.as_str())
        .context("missing user id")?
        .to_string();
    Ok((token, user_id))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    payload: Option<serde_json::Value>,
) -> Result<(StatusCode, serde_json::Value)> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    if payload.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = match payload {
        Some(value) => builder.body(Body::from(value.to_string()))?,
        None => builder.body(Body::empty())?,
    };
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn editing_is_open_to_members_but_deletion_is_not() -> Result<()> {
    let (_dir, app, pool) = setup().await?;

    let (owner, _) = register(&app, "Olive Owner", "olive@example.com").await?;
    let (cara, cara_id) = register(&app, "Cara Creator", "cara@example.com").await?;
    let (toby, toby_id) = register(&app, "Toby Member", "toby@example.com").await?;
    let (mallory, _) = register(&app, "Mallory Outsider", "mallory@example.com").await?;
    let (admin, _) = register(&app, "Ada Admin", "ada@example.com").await?;
    sqlx::query("UPDATE users SET role = 'admin' WHERE email = 'ada@example.com'")
        .execute(&pool)
        .await?;

    let (_, created) = send(
        &app,
        "POST",
        "/projects",
        &owner,
        Some(json!({"name": "Paper Trail"})),
    )
    .await?;
    let project_id = created
        .pointer("/data/id")
        .and_then(|v| v.as_str())
        .context("missing project id")?
        .to_string();
    for uid in [&cara_id, &toby_id] {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/projects/{}/members", project_id),
            &owner,
            Some(json!({"user_id": uid})),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Cara creates the task
    let (status, task) = send(
        &app,
        "POST",
        &format!("/projects/{}/tasks", project_id),
        &cara,
        Some(json!({"title": "Draft the postmortem", "tags": ["writing"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = task
        .pointer("/data/id")
        .and_then(|v| v.as_str())
        .context("missing task id")?
        .to_string();
    let task_uri = format!("/projects/{}/tasks/{}", project_id, task_id);

    // 1. Any member may edit fields, not just the creator
    let (status, edited) = send(
        &app,
        "PUT",
        &task_uri,
        &toby,
        Some(json!({"title": "Draft and review the postmortem", "priority": "low", "tags": ["writing", "review"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited.pointer("/data/title"), Some(&json!("Draft and review the postmortem")));
    assert_eq!(edited.pointer("/data/priority"), Some(&json!("low")));
    assert_eq!(edited.pointer("/data/tags"), Some(&json!(["writing", "review"])));

    // 2. Outsiders may not
    let (status, _) = send(&app, "PUT", &task_uri, &mallory, Some(json!({"title": "Vandalism"}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 3. Any viewer may comment; comments come back oldest first on the detail
    let comments_uri = format!("{}/comments", task_uri);
    let (status, _) = send(&app, "POST", &comments_uri, &toby, Some(json!({"body": "First pass done."}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, "POST", &comments_uri, &owner, Some(json!({"body": "Looks good."}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, "POST", &comments_uri, &mallory, Some(json!({"body": "Let me in."}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "POST", &comments_uri, &toby, Some(json!({"body": "   "}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, detail) = send(&app, "GET", &task_uri, &cara, None).await?;
    assert_eq!(status, StatusCode::OK);
    let comments = detail
        .pointer("/data/comments")
        .and_then(|v| v.as_array())
        .context("comments array")?;
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].get("body"), Some(&json!("First pass done.")));
    assert_eq!(comments[1].get("body"), Some(&json!("Looks good.")));

    // 4. A member who is neither creator nor owner cannot delete
    let (status, _) = send(&app, "DELETE", &task_uri, &toby, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 5. The creator can, even after leaving the project
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/projects/{}/members/{}", project_id, cara_id),
        &owner,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, deleted) = send(&app, "DELETE", &task_uri, &cara, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted.get("message").and_then(|v| v.as_str()), Some("Task deleted"));

    // 6. Gone from reads and lists
    let (status, _) = send(&app, "GET", &task_uri, &owner, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = send(&app, "GET", &format!("/projects/{}/tasks", project_id), &owner, None).await?;
    assert_eq!(
        list.pointer("/data").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // 7. Owner and admin can delete tasks they did not create
    let (_, task) = send(
        &app,
        "POST",
        &format!("/projects/{}/tasks", project_id),
        &toby,
        Some(json!({"title": "Owner fodder"})),
    )
    .await?;
    let second_id = task.pointer("/data/id").and_then(|v| v.as_str()).context("task id")?.to_string();
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/projects/{}/tasks/{}", project_id, second_id),
        &owner,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, task) = send(
        &app,
        "POST",
        &format!("/projects/{}/tasks", project_id),
        &toby,
        Some(json!({"title": "Admin fodder"})),
    )
    .await?;
    let third_id = task.pointer("/data/id").and_then(|v| v.as_str()).context("task id")?.to_string();
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/projects/{}/tasks/{}", project_id, third_id),
        &admin,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}
