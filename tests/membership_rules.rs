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
async fn roster_management_is_owner_territory() -> Result<()> {
    let (_dir, app, pool) = setup().await?;

    let (owner, owner_id) = register(&app, "Olive Owner", "olive@example.com").await?;
    let (mark, mark_id) = register(&app, "Mark Manager", "mark@example.com").await?;
    let (meg, meg_id) = register(&app, "Meg Member", "meg@example.com").await?;
    let (admin, _) = register(&app, "Ada Admin", "ada@example.com").await?;
    sqlx::query("UPDATE users SET role = 'admin' WHERE email = 'ada@example.com'")
        .execute(&pool)
        .await?;

    let (status, created) = send(
        &app,
        "POST",
        "/projects",
        &owner,
        Some(json!({"name": "Roster Project"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let project_id = created
        .pointer("/data/id")
        .and_then(|v| v.as_str())
        .context("missing project id")?
        .to_string();
    let members_uri = format!("/projects/{}/members", project_id);

    // 1. Owner adds Mark as a manager
    let (status, added) = send(
        &app,
        "POST",
        &members_uri,
        &owner,
        Some(json!({"user_id": mark_id, "role": "manager"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(added.pointer("/data/role"), Some(&json!("manager")));
    assert_eq!(added.pointer("/data/email"), Some(&json!("mark@example.com")));

    // 2. A manager still cannot touch the roster
    let (status, _) = send(
        &app,
        "POST",
        &members_uri,
        &mark,
        Some(json!({"user_id": meg_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "Managers do not manage membership");

    // 3. Admin can, without being on the roster
    let (status, added) = send(
        &app,
        "POST",
        &members_uri,
        &admin,
        Some(json!({"user_id": meg_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(added.pointer("/data/role"), Some(&json!("member")), "Role defaults to member");

    // 4. Adding the same user twice conflicts
    let (status, _) = send(
        &app,
        "POST",
        &members_uri,
        &owner,
        Some(json!({"user_id": meg_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // 5. The owner can never be put on their own roster
    let (status, _) = send(
        &app,
        "POST",
        &members_uri,
        &owner,
        Some(json!({"user_id": owner_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 6. Adding an unknown user is a 404
    let (status, _) = send(
        &app,
        "POST",
        &members_uri,
        &owner,
        Some(json!({"user_id": "00000000-0000-0000-0000-000000000000"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // 7. Roster listing shows both members, oldest first
    let (status, roster) = send(&app, "GET", &members_uri, &meg, None).await?;
    assert_eq!(status, StatusCode::OK);
    let entries = roster.pointer("/data").and_then(|v| v.as_array()).context("roster array")?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].get("email"), Some(&json!("mark@example.com")));

    // 8. Owner demotes Mark to member
    let (status, changed) = send(
        &app,
        "PUT",
        &format!("{}/{}", members_uri, mark_id),
        &owner,
        Some(json!({"role": "member"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(changed.pointer("/data/role"), Some(&json!("member")));

    // 9. Role update for someone off the roster is a 404
    let (status, _) = send(
        &app,
        "PUT",
        &format!("{}/{}", members_uri, owner_id),
        &owner,
        Some(json!({"role": "manager"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "The owner is not a roster row");

    // 10. A member cannot remove themselves
    let (status, _) = send(&app, "DELETE", &format!("{}/{}", members_uri, meg_id), &meg, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 11. Nobody removes the owner, not even an admin
    let (status, _) = send(&app, "DELETE", &format!("{}/{}", members_uri, owner_id), &admin, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "DELETE", &format!("{}/{}", members_uri, owner_id), &owner, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 12. Owner removes Meg; her access is gone on the next request
    let (status, removed) = send(&app, "DELETE", &format!("{}/{}", members_uri, meg_id), &owner, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed.get("message").and_then(|v| v.as_str()), Some("Member removed"));
    let (status, _) = send(&app, "GET", &format!("/projects/{}", project_id), &meg, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // 13. Removing her again is a 404
    let (status, _) = send(&app, "DELETE", &format!("{}/{}", members_uri, meg_id), &owner, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
