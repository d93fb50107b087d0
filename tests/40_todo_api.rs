mod common;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;

use common::{alice, app, json_request, send};

#[tokio::test]
async fn create_returns_the_filtered_todo() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "buy milk", "priority": "high"})),
    )?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"task": "buy milk", "priority": "high"}));
    assert_eq!(app.store.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn form_bodies_bind_like_json() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/todos")
        .header(header::AUTHORIZATION, &token)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("task=walk+dog&priority=medium"))?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::OK, "unexpected body: {}", body);
    assert_eq!(body["task"], "walk dog");
    Ok(())
}

#[tokio::test]
async fn blank_task_fails_validation() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "   ", "priority": "high"})),
    )?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["candidates"][0]["error_message"], "Validation failed: task must not be blank");
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/todos")
        .header(header::AUTHORIZATION, &token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 400);
    Ok(())
}

#[tokio::test]
async fn updating_a_missing_todo_is_not_found() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(Method::PUT, "/todos/nope", Some(&token), Some(json!({"completed": true})))?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 404);
    Ok(())
}

#[tokio::test]
async fn undeclared_update_fields_are_unprocessable() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "buy milk", "priority": "high"})),
    )?;
    send(&app.router, request).await?;
    let id = app.store.ids().await.into_iter().next().context("todo was not stored")?;

    let request = json_request(
        Method::PATCH,
        &format!("/todos/{}", id),
        Some(&token),
        Some(json!({"owner": "mallory", "created_at": "yesterday", "completed": true})),
    )?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["error_message"],
        "Unprocessable Entity : Unexpected fields: created_at, owner"
    );
    let stored = app.store.get(&id).await.context("todo vanished")?;
    assert!(!stored.completed);
    Ok(())
}

#[tokio::test]
async fn docs_describe_every_mounted_endpoint() -> Result<()> {
    let app = app()?;
    let (status, body) = send(&app.router, json_request(Method::GET, "/docs", None, None)?).await?;

    assert_eq!(status, StatusCode::OK);
    let post = &body["/todos"]["methods"]["POST"];
    assert_eq!(post[0]["endpoint"], "TodoCreate");
    assert_eq!(post[0]["description"], "Create a todo");
    assert_eq!(post[1]["endpoint"], "TodoBulkComplete");
    assert_eq!(body["/ping"]["allow_anonymous"], true);
    Ok(())
}

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let app = app()?;
    let (status, body) = send(&app.router, json_request(Method::GET, "/health", None, None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    Ok(())
}
