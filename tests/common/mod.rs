// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use account_api::config::Config;
use account_api::db::{FirestoreDb, MemoryStore};
use account_api::error::AppError;
use account_api::routes::create_router;
use account_api::services::{MediaUploader, UploadedMedia};
use account_api::AppState;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----account-api-test-boundary";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Connect to the Firestore emulator.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Media uploader that records uploads instead of calling the media host.
#[derive(Default)]
pub struct StubUploader {
    pub uploads: AtomicUsize,
    pub fail: AtomicBool,
    /// Milliseconds each upload takes.
    pub delay_ms: AtomicU64,
}

#[async_trait]
impl MediaUploader for StubUploader {
    async fn upload(&self, local_path: &Path) -> Result<UploadedMedia, AppError> {
        assert!(local_path.exists(), "staged file must exist during upload");
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Upload("stub media host is down".to_string()));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        Ok(UploadedMedia {
            url: format!("https://media.test/{}", name),
        })
    }
}

#[allow(dead_code)]
impl StubUploader {
    pub fn count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

/// Router plus handles on its in-memory collaborators.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub media: Arc<StubUploader>,
}

/// Response with the body parsed as JSON (`Null` if empty or not JSON).
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect()
    }

    pub fn cookie(&self, name: &str) -> String {
        let headers = self.set_cookies();
        headers
            .iter()
            .find(|value| value.starts_with(&format!("{name}=")))
            .cloned()
            .unwrap_or_else(|| panic!("missing Set-Cookie header for {name}: {headers:?}"))
    }
}

/// Create a test app over an in-memory store and a stub media host.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default())
}

/// Create a test app with a custom configuration.
#[allow(dead_code)]
pub fn create_test_app_with(config: Config) -> TestApp {
    let store = MemoryStore::new();
    let media = Arc::new(StubUploader::default());

    let state = Arc::new(AppState::new(
        config,
        Arc::new(store.clone()),
        media.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        media,
    }
}

/// Build a multipart body. Files are `(field, filename, bytes)`.
#[allow(dead_code)]
pub fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, filename, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[allow(dead_code)]
pub fn multipart_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    )
}

#[allow(dead_code)]
pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

impl TestApp {
    /// Send a request and collect the response.
    #[allow(dead_code)]
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Register a user with an avatar.
    #[allow(dead_code)]
    pub async fn register(&self, username: &str, email: &str, password: &str) -> TestResponse {
        let body = multipart_body(
            &[
                ("fullName", "Test User"),
                ("username", username),
                ("email", email),
                ("password", password),
            ],
            &[("avatar", "avatar.png", &b"fake-png-bytes"[..])],
        );
        let request = multipart_request("POST", "/api/v1/users/register")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Log in by username and return the response.
    #[allow(dead_code)]
    pub async fn login(&self, username: &str, password: &str) -> TestResponse {
        self.send(json_request(
            "POST",
            "/api/v1/users/login",
            &serde_json::json!({ "username": username, "password": password }),
        ))
        .await
    }

    /// Register and log in, returning `(access_token, refresh_token)`.
    #[allow(dead_code)]
    pub async fn signed_in(&self, username: &str) -> (String, String) {
        let email = format!("{username}@example.com");
        let registered = self.register(username, &email, "secret1").await;
        assert_eq!(registered.status, StatusCode::CREATED, "{:?}", registered.body);

        let login = self.login(username, "secret1").await;
        assert_eq!(login.status, StatusCode::OK, "{:?}", login.body);
        (
            login.body["data"]["accessToken"].as_str().unwrap().to_string(),
            login.body["data"]["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    /// Empty-bodied request authenticated with a bearer token.
    #[allow(dead_code)]
    pub async fn authed(&self, method: &str, uri: &str, token: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}
