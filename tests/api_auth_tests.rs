// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API authentication and CORS tests.
//!
//! These tests verify that:
//! 1. Protected routes reject requests without valid tokens
//! 2. Protected routes accept access tokens from a cookie or a bearer header
//! 3. CORS preflight requests return correct headers

use account_api::db::UserStore;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

mod common;
use common::create_test_app;

/// Sign access-token-shaped claims with an arbitrary key and lifetime.
fn create_test_jwt(id: &str, signing_key: &[u8], lifetime_secs: i64) -> String {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Claims {
        id: String,
        username: String,
        email: String,
        full_name: String,
        iat: i64,
        exp: i64,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let claims = Claims {
        id: id.to_string(),
        username: "someone".to_string(),
        email: "someone@example.com".to_string(),
        full_name: "Some One".to_string(),
        iat: now,
        exp: now + lifetime_secs,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

#[tokio::test]
async fn test_protected_route_without_token() {
    let app = create_test_app();

    let response = app
        .send(
            Request::builder()
                .method("GET")
                .uri("/api/v1/users/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["statusCode"], 401);
    assert_eq!(response.body["message"], "Unauthorized - No token provided");
    assert_eq!(response.body["success"], false);
    assert!(response.body["data"].is_null());
    assert!(response.body["error"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_protected_route_with_invalid_token() {
    let app = create_test_app();

    let response = app
        .authed("GET", "/api/v1/users/profile", "invalid.token.here")
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["success"], false);
}

#[tokio::test]
async fn test_protected_route_with_valid_token() {
    let app = create_test_app();
    let (access, _) = app.signed_in("alice").await;

    let response = app.authed("GET", "/api/v1/users/profile", &access).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["username"], "alice");
}

#[tokio::test]
async fn test_expired_access_token() {
    let app = create_test_app();
    let registered = app.register("bob", "b@x.com", "secret1").await;
    let id = registered.body["data"]["id"].as_str().unwrap();

    let expired = create_test_jwt(id, &app.state.config.access_token_secret, -60);
    let response = app.authed("GET", "/api/v1/users/profile", &expired).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.body["message"]
        .as_str()
        .unwrap()
        .contains("expired"));

    let fresh = create_test_jwt(id, &app.state.config.access_token_secret, 60);
    let response = app.authed("GET", "/api/v1/users/profile", &fresh).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_token_signed_with_refresh_secret_rejected() {
    let app = create_test_app();
    let registered = app.register("carol", "c@x.com", "secret1").await;
    let id = registered.body["data"]["id"].as_str().unwrap();

    let forged = create_test_jwt(id, &app.state.config.refresh_token_secret, 60);
    let response = app.authed("GET", "/api/v1/users/profile", &forged).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_deleted_user_rejected() {
    let app = create_test_app();
    let (access, _) = app.signed_in("dave").await;

    let user = app
        .store
        .find_by_username_or_email(Some("dave"), None)
        .await
        .unwrap()
        .unwrap();
    assert!(app.store.delete(&user.id).await.unwrap());

    let response = app.authed("GET", "/api/v1/users/profile", &access).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["message"], "Unauthorized - User not found");
}

#[tokio::test]
async fn test_cookie_token_accepted() {
    let app = create_test_app();
    let (access, _) = app.signed_in("erin").await;

    let response = app
        .send(
            Request::builder()
                .method("GET")
                .uri("/api/v1/users/profile")
                .header(header::COOKIE, format!("accessToken={access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_cookie_takes_precedence_over_header() {
    let app = create_test_app();
    let (access, _) = app.signed_in("frank").await;

    let cookie_wins = app
        .send(
            Request::builder()
                .method("GET")
                .uri("/api/v1/users/profile")
                .header(header::COOKIE, format!("accessToken={access}"))
                .header(header::AUTHORIZATION, "Bearer garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(cookie_wins.status, StatusCode::OK);

    let bad_cookie = app
        .send(
            Request::builder()
                .method("GET")
                .uri("/api/v1/users/profile")
                .header(header::COOKIE, "accessToken=garbage")
                .header(header::AUTHORIZATION, format!("Bearer {access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(bad_cookie.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_every_protected_route_requires_auth() {
    let app = create_test_app();

    let routes = [
        ("GET", "/api/v1/users"),
        ("POST", "/api/v1/users/logout"),
        ("PUT", "/api/v1/users/change-password"),
        ("GET", "/api/v1/users/profile"),
        ("PUT", "/api/v1/users/update-account"),
        ("PUT", "/api/v1/users/update-avatar"),
        ("PUT", "/api/v1/users/update-cover-image"),
        ("DELETE", "/api/v1/users/some-id"),
    ];

    for (method, uri) in routes {
        let response = app
            .send(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(
            response.status,
            StatusCode::UNAUTHORIZED,
            "{method} {uri} should require auth"
        );
    }
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = create_test_app();

    let response = app
        .send(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/users/profile")
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    // OPTIONS should return 200 (CORS preflight success)
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(
        response.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
    assert_eq!(
        response.headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
    assert!(response
        .headers
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}

#[tokio::test]
async fn test_cors_rejects_unknown_origin() {
    let app = create_test_app();

    let response = app
        .send(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/users/profile")
                .header(header::ORIGIN, "https://evil.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert!(!response
        .headers
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_public_route_no_auth_required() {
    let app = create_test_app();

    for uri in ["/health", "/"] {
        let response = app
            .send(
                Request::builder()
                    .method("GET")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{uri}");
    }

    let status = app
        .send(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status.body["success"], true);
    assert_eq!(status.body["message"], "API is working");
}
