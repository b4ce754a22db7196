use std::time::Duration;

use axum::http::{self, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mock_server::{app, app_with_limit, SYSTEM_COUNT};
use serde_json::Value;
use tower::{Service, ServiceExt};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes: bytes::Bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: &str) -> Request<String> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body.to_string()).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<String> {
    json_request("GET", uri, token, "")
}

async fn send(app: &mut axum::routing::RouterIntoService<String>, request: Request<String>) -> (StatusCode, Value) {
    let resp = ServiceExt::<Request<String>>::ready(app).await.unwrap().call(request).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

fn service(router: Router) -> axum::routing::RouterIntoService<String> {
    router.into_service()
}

// --- register ---

#[tokio::test]
async fn register_returns_token_and_agent() {
    let resp = app()
        .oneshot(json_request("POST", "/v2/register", None, r#"{"symbol":"FLEET","faction":"COSMIC"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert!(body["data"]["token"].as_str().is_some());
    assert_eq!(body["data"]["agent"]["symbol"], "FLEET");
}

#[tokio::test]
async fn register_missing_faction_is_422_envelope() {
    let resp = app()
        .oneshot(json_request("POST", "/v2/register", None, r#"{"symbol":"FLEET"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], 422);
}

#[tokio::test]
async fn register_twice_conflicts() {
    let mut app = service(app());
    let input = r#"{"symbol":"TWICE","faction":"COSMIC"}"#;
    let (status, _) = send(&mut app, json_request("POST", "/v2/register", None, input)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&mut app, json_request("POST", "/v2/register", None, input)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], 4111);
    assert_eq!(body["error"]["data"]["agentSymbol"], "TWICE");
}

// --- auth ---

#[tokio::test]
async fn my_agent_without_token_is_401() {
    let resp = app().oneshot(get("/v2/my/agent", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], 401);
}

#[tokio::test]
async fn my_agent_with_unknown_token_is_401() {
    let resp = app().oneshot(get("/v2/my/agent", Some("nope"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- systems ---

#[tokio::test]
async fn systems_are_paginated() {
    let resp = app().oneshot(get("/v2/systems?limit=5&page=3", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), SYSTEM_COUNT - 10);
    assert_eq!(body["meta"]["total"], SYSTEM_COUNT);
    assert_eq!(body["meta"]["page"], 3);
}

#[tokio::test]
async fn systems_reject_oversized_limit() {
    let resp = app().oneshot(get("/v2/systems?limit=50", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// --- ships ---

#[tokio::test]
async fn ship_lifecycle() {
    let mut app = service(app());

    let (_, body) = send(
        &mut app,
        json_request("POST", "/v2/register", None, r#"{"symbol":"MINER","faction":"COSMIC"}"#),
    )
    .await;
    let token = body["data"]["token"].as_str().unwrap().to_string();
    let token = Some(token.as_str());

    // extract while docked
    let (status, body) = send(&mut app, json_request("POST", "/v2/my/ships/MINER-1/extract", token, "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 4236);

    // orbit, then extract
    let (status, body) = send(&mut app, json_request("POST", "/v2/my/ships/MINER-1/orbit", token, "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nav"]["status"], "IN_ORBIT");

    let (status, body) = send(&mut app, json_request("POST", "/v2/my/ships/MINER-1/extract", token, "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["extraction"]["yield"]["symbol"], "IRON_ORE");

    // second extract hits the cooldown
    let (status, body) = send(&mut app, json_request("POST", "/v2/my/ships/MINER-1/extract", token, "")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], 4000);
    assert!(body["error"]["data"]["cooldown"]["remainingSeconds"].as_u64().unwrap() > 0);

    // flight mode
    let (status, body) = send(
        &mut app,
        json_request("PATCH", "/v2/my/ships/MINER-1/nav", token, r#"{"flightMode":"DRIFT"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["flightMode"], "DRIFT");

    let (status, _) = send(
        &mut app,
        json_request("PATCH", "/v2/my/ships/MINER-1/nav", token, r#"{"flightMode":"WARP"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // unknown ship
    let (status, body) = send(&mut app, get("/v2/my/ships/GHOST-9/nav", token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 404);

    // dock
    let (status, body) = send(&mut app, json_request("POST", "/v2/my/ships/MINER-1/dock", token, "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nav"]["status"], "DOCKED");
}

// --- rate limit ---

#[tokio::test(start_paused = true)]
async fn limit_answers_429_with_retry_after() {
    let mut app = service(app_with_limit(2, Duration::from_secs(1)));

    for _ in 0..2 {
        let (status, _) = send(&mut app, get("/v2/systems", None)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&mut app, get("/v2/systems", None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], 429);
    assert_eq!(body["error"]["data"]["retryAfter"], 1.0);

    tokio::time::advance(Duration::from_secs(1)).await;
    let (status, _) = send(&mut app, get("/v2/systems", None)).await;
    assert_eq!(status, StatusCode::OK);
}
