mod common;

use anyhow::{Context, Result};
use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{alice, app, json_request, send};
use declarative_api::testing::test_config;
use declarative_api::todo::build_app;

#[tokio::test]
async fn synchronous_notification_runs_before_the_response() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "buy milk", "priority": "high"})),
    )?;
    let (status, _) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::OK);

    let id = app.store.ids().await.into_iter().next().context("todo was not stored")?;
    assert_eq!(
        app.notifications.all(),
        vec![json!({"todo_id": id, "task": "buy milk", "priority": "high"})]
    );
    Ok(())
}

#[tokio::test]
async fn low_priority_todos_skip_notification() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "water plants", "priority": "low"})),
    )?;
    assert_eq!(send(&app.router, request).await?.0, StatusCode::OK);

    assert_eq!(app.store.len().await, 1);
    assert!(app.notifications.all().is_empty());
    Ok(())
}

#[tokio::test]
async fn queued_notification_arrives_after_the_worker_drains() -> Result<()> {
    let mut config = test_config();
    config.tasks.force_synchronous = false;
    let app = build_app(&config)?;
    let queue = app.queue.clone().context("queue should be running")?;
    let token = alice()?;

    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "file taxes", "priority": "medium"})),
    )?;
    assert_eq!(send(&app.router, request).await?.0, StatusCode::OK);

    queue.wait_idle().await;
    let notifications = app.notifications.all();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["task"], "file taxes");
    assert_eq!(queue.stats().succeeded, 1);
    Ok(())
}

#[tokio::test]
async fn owner_is_assigned_by_an_immediate_task() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "buy milk", "priority": "medium"})),
    )?;
    send(&app.router, request).await?;

    let todo = app.store.all().await.into_iter().next().context("todo was not stored")?;
    let owner = todo.owner.context("owner was not assigned")?;
    assert_eq!(owner.key, "alice");
    assert_eq!(owner.name, "alice user");
    Ok(())
}
