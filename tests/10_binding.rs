mod common;

use anyhow::Result;
use axum::http::{header, Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::{alice, app, auditor, json_request, send};

#[tokio::test]
async fn anonymous_resources_need_no_credentials() -> Result<()> {
    let app = app()?;
    let (status, body) = send(&app.router, json_request(Method::GET, "/ping", None, None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ping": "pong"}));
    Ok(())
}

#[tokio::test]
async fn protected_resources_require_credentials() -> Result<()> {
    let app = app()?;
    let (status, body) = send(&app.router, json_request(Method::GET, "/todos", None, None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], 607);
    Ok(())
}

#[tokio::test]
async fn bad_token_gets_bearer_challenge() -> Result<()> {
    let app = app()?;
    let request = json_request(Method::GET, "/todos", Some("Bearer not-a-jwt"), None)?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).and_then(|v| v.to_str().ok()),
        Some("Bearer realm=\"api\"")
    );
    Ok(())
}

#[tokio::test]
async fn unmatched_post_reports_every_candidate() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(Method::POST, "/todos", Some(&token), Some(json!({"task": "buy milk"})))?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let candidates = body["candidates"].as_array().cloned().unwrap_or_default();
    assert_eq!(candidates.len(), 2, "unexpected body: {}", body);
    assert_eq!(candidates[0]["endpoint"], "TodoCreate");
    assert_eq!(candidates[0]["error_code"], 702);
    assert_eq!(candidates[0]["error_message"], "Missing required field(s): priority");
    assert_eq!(candidates[1]["endpoint"], "TodoBulkComplete");
    Ok(())
}

#[tokio::test]
async fn invalid_priority_rejects_create() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "buy milk", "priority": "urgent"})),
    )?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["candidates"][0]["error_code"], 703);
    assert_eq!(app.store.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn second_candidate_binds_on_its_own_fields() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    for task in ["buy milk", "walk dog"] {
        let request = json_request(
            Method::POST,
            "/todos",
            Some(&token),
            Some(json!({"task": task, "priority": "medium"})),
        )?;
        assert_eq!(send(&app.router, request).await?.0, StatusCode::OK);
    }

    let request = json_request(Method::POST, "/todos", Some(&token), Some(json!({"complete_all": true})))?;
    let (status, body) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"completed": 2}));

    let (status, body) = send(&app.router, json_request(Method::GET, "/todos?completed=true", Some(&token), None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn read_only_consumers_can_read_but_not_write() -> Result<()> {
    let app = app()?;
    let writer = alice()?;
    let reader = auditor()?;

    let request = json_request(
        Method::POST,
        "/todos",
        Some(&writer),
        Some(json!({"task": "buy milk", "priority": "high"})),
    )?;
    let (_, created) = send(&app.router, request).await?;
    assert_eq!(created, json!({"task": "buy milk", "priority": "high"}));
    let id = app
        .store
        .ids()
        .await
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("todo was not stored"))?;

    let (status, _) = send(&app.router, json_request(Method::GET, "/todos", Some(&reader), None)?).await?;
    assert_eq!(status, StatusCode::OK);

    let request = json_request(
        Method::PATCH,
        &format!("/todos/{}", id),
        Some(&reader),
        Some(json!({"completed": true})),
    )?;
    let (status, body) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_message"], "Not allowed: Action not allowed for read-only consumer");
    Ok(())
}

#[tokio::test]
async fn unhandled_method_is_not_allowed() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(Method::DELETE, "/todos", Some(&token), None)?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.headers().get(header::ALLOW).and_then(|v| v.to_str().ok()),
        Some("GET, POST")
    );
    Ok(())
}

#[tokio::test]
async fn lookup_takes_exactly_one_key() -> Result<()> {
    let app = app()?;
    let token = alice()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&token),
        Some(json!({"task": "buy milk", "priority": "high"})),
    )?;
    assert_eq!(send(&app.router, request).await?.0, StatusCode::OK);
    let id = app
        .store
        .ids()
        .await
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("todo was not stored"))?;

    let uri = "/todos/lookup?task=buy%20milk";
    let (status, body) = send(&app.router, json_request(Method::GET, uri, Some(&token), None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!(id));

    let uri = format!("/todos/lookup?id={}&task=buy%20milk", id);
    let (status, body) = send(&app.router, json_request(Method::GET, &uri, Some(&token), None)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 702);

    let (status, _) = send(&app.router, json_request(Method::GET, "/todos/lookup", Some(&token), None)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn shared_rejection_status_still_lists_candidates() -> Result<()> {
    let app = app()?;
    let reader = auditor()?;
    let request = json_request(
        Method::POST,
        "/todos",
        Some(&reader),
        Some(json!({"task": "buy milk", "priority": "high", "complete_all": true})),
    )?;
    let (status, body) = send(&app.router, request).await?;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], 400);
    let candidates = body["candidates"].as_array().cloned().unwrap_or_default();
    assert_eq!(candidates.len(), 2, "unexpected body: {}", body);
    assert_eq!(candidates[0]["error_code"], 601);
    assert_eq!(candidates[1]["error_code"], 601);
    Ok(())
}
