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
async fn task_creation_and_assignment_follow_project_settings() -> Result<()> {
    let (_dir, app, pool) = setup().await?;

    let (owner, _owner_id) = register(&app, "Olive Owner", "olive@example.com").await?;
    let (mark, mark_id) = register(&app, "Mark Manager", "mark@example.com").await?;
    let (mia, mia_id) = register(&app, "Mia Member", "mia@example.com").await?;
    let (mallory, mallory_id) = register(&app, "Mallory Outsider", "mallory@example.com").await?;
    let (admin, _) = register(&app, "Ada Admin", "ada@example.com").await?;
    sqlx::query("UPDATE users SET role = 'admin' WHERE email = 'ada@example.com'")
        .execute(&pool)
        .await?;

    let (_, created) = send(
        &app,
        "POST",
        "/projects",
        &owner,
        Some(json!({"name": "Build Week"})),
    )
    .await?;
    let project_id = created
        .pointer("/data/id")
        .and_then(|v| v.as_str())
        .context("missing project id")?
        .to_string();
    let tasks_uri = format!("/projects/{}/tasks", project_id);
    let project_uri = format!("/projects/{}", project_id);

    for (uid, role) in [(&mark_id, "manager"), (&mia_id, "member")] {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/projects/{}/members", project_id),
            &owner,
            Some(json!({"user_id": uid, "role": role})),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    // 1. Defaults allow member task creation
    let (status, task) = send(
        &app,
        "POST",
        &tasks_uri,
        &mia,
        Some(json!({"title": "Sort crates"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task.pointer("/data/status"), Some(&json!("todo")));
    assert_eq!(task.pointer("/data/priority"), Some(&json!("medium")));
    assert_eq!(task.pointer("/data/assignee"), Some(&json!(null)));
    let task_id = task
        .pointer("/data/id")
        .and_then(|v| v.as_str())
        .context("missing task id")?
        .to_string();

    // 2. An empty title never passes
    let (status, _) = send(&app, "POST", &tasks_uri, &mia, Some(json!({"title": "  "}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 3. Outsiders cannot create tasks at all
    let (status, _) = send(
        &app,
        "POST",
        &tasks_uri,
        &mallory,
        Some(json!({"title": "Sneaky"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 4. Pre-assigning on create counts as assigning, which members cannot do yet
    let (status, _) = send(
        &app,
        "POST",
        &tasks_uri,
        &mia,
        Some(json!({"title": "Assigned at birth", "assignee": mia_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 5. Nor can members assign after the fact
    let (status, _) = send(
        &app,
        "PUT",
        &format!("{}/{}/assignee", tasks_uri, task_id),
        &mia,
        Some(json!({"assignee": mia_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 6. A manager assigns Mia
    let (status, assigned) = send(
        &app,
        "PUT",
        &format!("{}/{}/assignee", tasks_uri, task_id),
        &mark,
        Some(json!({"assignee": mia_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned.pointer("/data/assignee"), Some(&json!(mia_id)));

    // 7. Assigning someone outside the project is a validation error, not a 403
    let (status, rejected) = send(
        &app,
        "PUT",
        &format!("{}/{}/assignee", tasks_uri, task_id),
        &mark,
        Some(json!({"assignee": mallory_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected.get("success"), Some(&json!(false)));

    // 8. Null clears the assignment
    let (status, cleared) = send(
        &app,
        "PUT",
        &format!("{}/{}/assignee", tasks_uri, task_id),
        &mark,
        Some(json!({"assignee": null})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared.pointer("/data/assignee"), Some(&json!(null)));

    // 9. Flipping allowMemberTaskAssignment lets members assign
    let (status, _) = send(
        &app,
        "PUT",
        &project_uri,
        &owner,
        Some(json!({"settings": {"allow_member_task_assignment": true}})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        "PUT",
        &format!("{}/{}/assignee", tasks_uri, task_id),
        &mia,
        Some(json!({"assignee": mia_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // 10. Turning member creation off leaves leads and admins unaffected
    let (status, _) = send(
        &app,
        "PUT",
        &project_uri,
        &owner,
        Some(json!({"settings": {"allow_member_task_creation": false}})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "POST", &tasks_uri, &mia, Some(json!({"title": "Blocked"}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "POST", &tasks_uri, &mark, Some(json!({"title": "Lead task"}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, "POST", &tasks_uri, &admin, Some(json!({"title": "Admin task"}))).await?;
    assert_eq!(status, StatusCode::CREATED);

    // 11. The default priority setting shapes new tasks
    let (status, _) = send(
        &app,
        "PUT",
        &project_uri,
        &owner,
        Some(json!({"settings": {"default_task_priority": "high"}})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, task) = send(&app, "POST", &tasks_uri, &owner, Some(json!({"title": "Rush job"}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task.pointer("/data/priority"), Some(&json!("high")));

    // 12. Listing filters by status and assignee
    let (status, list) = send(&app, "GET", &format!("{}?status=todo", tasks_uri), &owner, None).await?;
    assert_eq!(status, StatusCode::OK);
    let todos = list.pointer("/data").and_then(|v| v.as_array()).context("task array")?;
    assert!(todos.len() >= 4);
    let (status, list) = send(
        &app,
        "GET",
        &format!("{}?assignee={}", tasks_uri, mia_id),
        &owner,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let mine = list.pointer("/data").and_then(|v| v.as_array()).context("task array")?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("id").and_then(|v| v.as_str()), Some(task_id.as_str()));

    Ok(())
}
