// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access-token authentication middleware.

use crate::error::AppError;
use crate::models::UserProfile;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Cookie carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
/// Cookie carrying the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Authenticated user attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub profile: UserProfile,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.profile.id
    }
}

/// Extract the access token: cookie first, then `Authorization: Bearer`.
pub fn access_token_from(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Middleware that requires a valid access token for an existing user.
///
/// On any failure the request is answered with 401 and the handler never runs.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = access_token_from(&jar, request.headers())
        .ok_or_else(|| AppError::unauthorized("Unauthorized - No token provided"))?;

    let claims = state.tokens.verify_access_token(&token)?;

    let user = state
        .store
        .find_by_id(&claims.id)
        .await?
        .ok_or_else(|| {
            tracing::debug!(user_id = %claims.id, "Access token for unknown user");
            AppError::unauthorized("Unauthorized - User not found")
        })?;

    request.extensions_mut().insert(AuthUser {
        profile: user.profile(),
    });

    Ok(next.run(request).await)
}
