// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are read once at startup and kept in memory. A `.env` file in the
//! working directory is honoured for local development.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default access token lifetime (1 day).
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default refresh token lifetime (10 days).
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Which credential store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Firestore,
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Server port
    pub port: u16,
    /// Allowed CORS origin (`*` allows any origin)
    pub cors_origin: String,
    /// GCP project ID (Firestore database)
    pub gcp_project_id: String,
    /// Credential store backend
    pub store: StoreKind,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Whether auth cookies carry the `Secure` attribute
    pub cookie_secure: bool,
    /// Cloudinary cloud name
    pub cloudinary_cloud_name: String,
    /// Cloudinary API key (public)
    pub cloudinary_api_key: String,
    /// Directory where multipart uploads are staged before going to the media host
    pub upload_dir: PathBuf,
    /// Directory served as static files
    pub public_dir: PathBuf,
    /// Upper bound for handling a single request
    pub request_timeout: Duration,

    // --- Secrets ---
    /// HS256 key for access tokens (raw bytes)
    pub access_token_secret: Vec<u8>,
    /// HS256 key for refresh tokens (raw bytes), distinct from the access key
    pub refresh_token_secret: Vec<u8>,
    /// Cloudinary API secret used to sign uploads
    pub cloudinary_api_secret: String,
}

impl Config {
    /// Deterministic configuration for tests.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            cors_origin: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            store: StoreKind::Memory,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            cookie_secure: true,
            cloudinary_cloud_name: "test-cloud".to_string(),
            cloudinary_api_key: "test_api_key".to_string(),
            upload_dir: env::temp_dir().join("account-api-test-uploads"),
            public_dir: PathBuf::from("public"),
            request_timeout: Duration::from_secs(30),
            access_token_secret: b"test_access_secret_32_bytes_min!".to_vec(),
            refresh_token_secret: b"test_refresh_secret_32_bytes_mn!".to_vec(),
            cloudinary_api_secret: "test_api_secret".to_string(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let access_token_secret = required("ACCESS_TOKEN_SECRET")?.into_bytes();
        let refresh_token_secret = required("REFRESH_TOKEN_SECRET")?.into_bytes();
        if access_token_secret == refresh_token_secret {
            return Err(ConfigError::Invalid(
                "REFRESH_TOKEN_SECRET",
                "must differ from ACCESS_TOKEN_SECRET".to_string(),
            ));
        }

        let store = match env::var("STORE").as_deref() {
            Ok("memory") => StoreKind::Memory,
            Ok("firestore") | Err(_) => StoreKind::Firestore,
            Ok(other) => {
                return Err(ConfigError::Invalid("STORE", other.to_string()));
            }
        };

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            store,
            access_token_ttl: ttl_var("ACCESS_TOKEN_EXPIRY", DEFAULT_ACCESS_TOKEN_TTL)?,
            refresh_token_ttl: ttl_var("REFRESH_TOKEN_EXPIRY", DEFAULT_REFRESH_TOKEN_TTL)?,
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v.trim() != "false")
                .unwrap_or(true),
            cloudinary_cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
            cloudinary_api_key: required("CLOUDINARY_API_KEY")?,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("account-api-uploads")),
            public_dir: env::var("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("public")),
            request_timeout: Duration::from_secs(
                env::var("REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            access_token_secret,
            refresh_token_secret,
            cloudinary_api_secret: required("CLOUDINARY_API_SECRET")?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn ttl_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_ttl(&raw).ok_or(ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Parse a token lifetime such as `15m`, `1d` or `3600` (seconds).
pub fn parse_ttl(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return None,
    };

    if value == 0 {
        return None;
    }
    value.checked_mul(multiplier).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
