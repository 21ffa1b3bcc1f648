// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Router-wide behavior: body limits, request timeout, static files.

use account_api::config::Config;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tower::ServiceExt;

mod common;
use common::{
    create_test_app, create_test_app_with, json_request, multipart_body, multipart_request,
    TestApp, TestResponse,
};

const MIB: usize = 1024 * 1024;

async fn register_with_avatar(app: &TestApp, username: &str, avatar: &[u8]) -> TestResponse {
    let email = format!("{username}@example.com");
    let body = multipart_body(
        &[
            ("fullName", "Test User"),
            ("username", username),
            ("email", email.as_str()),
            ("password", "secret1"),
        ],
        &[("avatar", "avatar.png", avatar)],
    );
    app.send(
        multipart_request("POST", "/api/v1/users/register")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

fn assert_too_large(response: &TestResponse) {
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.body["statusCode"], 413);
    assert_eq!(response.body["success"], false);
    assert!(response.body["data"].is_null());
}

#[tokio::test]
async fn test_upload_above_json_limit_is_accepted() {
    let app = create_test_app();
    let avatar = vec![7u8; 64 * 1024];

    let response = register_with_avatar(&app, "alice", &avatar).await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    assert_eq!(app.media.count(), 1);
}

#[tokio::test]
async fn test_upload_above_media_limit_is_rejected() {
    let app = create_test_app();
    let avatar = vec![7u8; 11 * MIB];

    let response = register_with_avatar(&app, "bob", &avatar).await;
    assert_too_large(&response);
    assert!(app.store.is_empty());
    assert_eq!(app.media.count(), 0);
}

#[tokio::test]
async fn test_avatar_update_above_media_limit_is_rejected() {
    let app = create_test_app();
    let (access, _) = app.signed_in("carol").await;
    let before = app.authed("GET", "/api/v1/users/profile", &access).await;

    let response = app
        .send(
            multipart_request("PUT", "/api/v1/users/update-avatar")
                .header(header::AUTHORIZATION, format!("Bearer {access}"))
                .body(Body::from(multipart_body(
                    &[],
                    &[("avatar", "big.png", &vec![7u8; 11 * MIB][..])],
                )))
                .unwrap(),
        )
        .await;
    assert_too_large(&response);
    assert_eq!(app.media.count(), 1);

    let after = app.authed("GET", "/api/v1/users/profile", &access).await;
    assert_eq!(after.body["data"]["avatar"], before.body["data"]["avatar"]);
}

#[tokio::test]
async fn test_json_above_limit_is_rejected() {
    let app = create_test_app();
    app.signed_in("dave").await;

    let response = app
        .send(json_request(
            "POST",
            "/api/v1/users/login",
            &json!({ "username": "dave", "password": "x".repeat(20 * 1024) }),
        ))
        .await;
    assert_too_large(&response);
}

#[tokio::test]
async fn test_refresh_body_above_limit_is_rejected() {
    let app = create_test_app();

    let response = app
        .send(json_request(
            "POST",
            "/api/v1/users/refresh-token",
            &json!({ "refreshToken": "x".repeat(20 * 1024) }),
        ))
        .await;
    assert_too_large(&response);
}

#[tokio::test]
async fn test_slow_request_times_out() {
    let mut config = Config::test_default();
    config.request_timeout = Duration::from_millis(50);
    let app = create_test_app_with(config);
    app.media.delay_ms.store(2_000, Ordering::SeqCst);

    let response = register_with_avatar(&app, "erin", b"avatar-bytes").await;
    assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_static_files_are_served() {
    let public_dir =
        std::env::temp_dir().join(format!("account-api-public-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&public_dir).unwrap();
    std::fs::write(public_dir.join("hello.txt"), "hello from public").unwrap();

    let mut config = Config::test_default();
    config.public_dir = public_dir.clone();
    let app = create_test_app_with(config);

    let request = |uri: &str| {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.router.clone().oneshot(request("/hello.txt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello from public");

    let missing = app.send(request("/missing.txt")).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    // API routes win over the static fallback
    let health = app.send(request("/health")).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "ok");

    std::fs::remove_dir_all(&public_dir).ok();
}
