// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User account routes: registration, sessions, and profile management.

use crate::error::{AppError, Result};
use crate::middleware::auth::{require_auth, AuthUser, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::models::user::normalize_key;
use crate::models::{ApiResponse, NewUser, RegistrationFields, User, UserProfile};
use crate::routes::form::{require_present, JsonBody, UploadForm};
use crate::services::media::upload_staged;
use crate::services::password::verify_password;
use crate::services::TokenPair;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    middleware,
    routing::{delete, get, post, put},
    Extension, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Body limit for routes that accept image uploads.
pub const MEDIA_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Routes mounted under `/api/v1/users`.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(MEDIA_BODY_LIMIT)),
        )
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token));

    let protected = Router::new()
        .route("/", get(list_users))
        .route("/logout", post(logout))
        .route("/change-password", put(change_password))
        .route("/profile", get(get_profile))
        .route("/update-account", put(update_account))
        .route(
            "/update-avatar",
            put(update_avatar).layer(DefaultBodyLimit::max(MEDIA_BODY_LIMIT)),
        )
        .route(
            "/update-cover-image",
            put(update_cover_image).layer(DefaultBodyLimit::max(MEDIA_BODY_LIMIT)),
        )
        .route("/{id}", delete(delete_user))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    public.merge(protected)
}

// ─── Cookies ─────────────────────────────────────────────────

fn session_cookie(
    name: &'static str,
    value: String,
    ttl: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(
            i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        ))
        .build()
}

fn removal_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, ""))
        .http_only(true)
        .secure(secure)
        .path("/")
        .same_site(SameSite::Lax)
        .build();
    cookie.make_removal();
    cookie
}

fn with_session_cookies(jar: CookieJar, state: &AppState, pair: &TokenPair) -> CookieJar {
    let secure = state.config.cookie_secure;
    jar.add(session_cookie(
        ACCESS_TOKEN_COOKIE,
        pair.access_token.clone(),
        state.tokens.access_ttl(),
        secure,
    ))
    .add(session_cookie(
        REFRESH_TOKEN_COOKIE,
        pair.refresh_token.clone(),
        state.tokens.refresh_ttl(),
        secure,
    ))
}

fn without_session_cookies(jar: CookieJar, state: &AppState) -> CookieJar {
    let secure = state.config.cookie_secure;
    jar.add(removal_cookie(ACCESS_TOKEN_COOKIE, secure))
        .add(removal_cookie(REFRESH_TOKEN_COOKIE, secure))
}

async fn load_user(state: &AppState, id: &str) -> Result<User> {
    state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

// ─── Registration ────────────────────────────────────────────

/// Register a new user from a multipart form with an avatar and optional cover image.
async fn register(
    State(state): State<Arc<AppState>>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> Result<ApiResponse<UserProfile>> {
    let mut form = UploadForm::read(multipart, &state.config.upload_dir).await?;

    let fields = RegistrationFields {
        username: form.text("username").trim().to_string(),
        email: form.text("email").trim().to_string(),
        full_name: form.text("fullName").trim().to_string(),
        password: form.text("password"),
    };

    require_present(&[
        ("fullName", fields.full_name.as_str()),
        ("username", fields.username.as_str()),
        ("email", fields.email.as_str()),
        ("password", fields.password.as_str()),
    ])?;
    fields.validate()?;

    if state
        .store
        .find_by_username_or_email(Some(&fields.username), Some(&fields.email))
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "User with this username or email already exists".to_string(),
        ));
    }

    let avatar = form
        .take_file("avatar")
        .ok_or_else(|| AppError::Validation("Avatar file is required".to_string()))?;
    let avatar = upload_staged(state.media.as_ref(), avatar).await?;

    let cover_image = match form.take_file("coverImage") {
        Some(file) => Some(upload_staged(state.media.as_ref(), file).await?.url),
        None => None,
    };

    let user = state
        .store
        .create(User::new(NewUser {
            username: fields.username,
            email: fields.email,
            full_name: fields.full_name,
            password: fields.password,
            avatar: avatar.url,
            cover_image,
        }))
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    Ok(ApiResponse::created(
        "User registered successfully",
        user.profile(),
    ))
}

// ─── Sessions ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
}

/// Log in with username or email; tokens go both into cookies and the body.
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    JsonBody(body): JsonBody<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<LoginData>)> {
    if body.username.trim().is_empty() && body.email.trim().is_empty() {
        return Err(AppError::Validation(
            "Username or email is required".to_string(),
        ));
    }
    require_present(&[("password", body.password.as_str())])?;

    let user = state
        .store
        .find_by_username_or_email(Some(&body.username), Some(&body.email))
        .await?
        .ok_or_else(|| AppError::NotFound("User does not exist".to_string()))?;

    if !verify_password(&user, &body.password).await? {
        tracing::info!(user_id = %user.id, "Login rejected: wrong password");
        return Err(AppError::unauthorized("Invalid user credentials"));
    }

    let pair = state.tokens.issue_pair(state.store.as_ref(), &user.id).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    let jar = with_session_cookies(jar, &state, &pair);
    Ok((
        jar,
        ApiResponse::ok(
            "User logged in successfully",
            LoginData {
                user: user.profile(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
        ),
    ))
}

/// Log out: drop the stored refresh token and clear both cookies.
async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<Value>)> {
    state.store.set_refresh_token(auth.id(), None).await?;
    tracing::info!(user_id = %auth.id(), "User logged out");

    Ok((
        without_session_cookies(jar, &state),
        ApiResponse::ok("User logged out successfully", json!({})),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchange a refresh token (cookie first, then JSON body) for a new pair.
async fn refresh_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    WithRejection(body, _): WithRejection<Bytes, AppError>,
) -> Result<(CookieJar, ApiResponse<TokenPair>)> {
    let from_cookie = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty());

    let presented = from_cookie
        .or_else(|| {
            serde_json::from_slice::<RefreshRequest>(&body)
                .ok()
                .and_then(|req| req.refresh_token)
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Unauthorized - No refresh token provided"))?;

    let pair = state.tokens.rotate(state.store.as_ref(), &presented).await?;

    let jar = with_session_cookies(jar, &state, &pair);
    Ok((jar, ApiResponse::ok("Access token refreshed", pair)))
}

// ─── Password ────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    #[validate(length(min = 6, max = 1024, message = "must be 6-1024 characters"))]
    pub new_password: String,
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    JsonBody(body): JsonBody<ChangePasswordRequest>,
) -> Result<ApiResponse<Value>> {
    require_present(&[
        ("oldPassword", body.old_password.as_str()),
        ("newPassword", body.new_password.as_str()),
    ])?;
    body.validate()?;

    let mut user = load_user(&state, auth.id()).await?;
    if !verify_password(&user, &body.old_password).await? {
        return Err(AppError::unauthorized("Invalid old password"));
    }

    user.set_password(body.new_password);
    state.store.save(&mut user).await?;
    tracing::info!(user_id = %user.id, "Password changed");

    Ok(ApiResponse::ok("Password changed successfully", json!({})))
}

// ─── Profile ─────────────────────────────────────────────────

async fn get_profile(Extension(auth): Extension<AuthUser>) -> ApiResponse<UserProfile> {
    ApiResponse::ok("User profile fetched successfully", auth.profile)
}

async fn list_users(State(state): State<Arc<AppState>>) -> Result<ApiResponse<Vec<UserProfile>>> {
    let users = state.store.list().await?;
    Ok(ApiResponse::ok(
        "Users fetched successfully",
        users.iter().map(User::profile).collect(),
    ))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Value>> {
    if !state.store.delete(&id).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    tracing::info!(user_id = %id, deleted_by = %auth.id(), "User deleted");

    Ok(ApiResponse::ok("User deleted successfully", json!({})))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    #[serde(default)]
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub full_name: String,
    #[serde(default)]
    #[validate(length(min = 3, max = 30, message = "must be 3-30 characters"))]
    pub username: String,
    #[serde(default)]
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

async fn update_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    JsonBody(body): JsonBody<UpdateAccountRequest>,
) -> Result<ApiResponse<UserProfile>> {
    let body = UpdateAccountRequest {
        full_name: body.full_name.trim().to_string(),
        username: body.username.trim().to_string(),
        email: body.email.trim().to_string(),
    };
    require_present(&[
        ("fullName", body.full_name.as_str()),
        ("username", body.username.as_str()),
        ("email", body.email.as_str()),
    ])?;
    body.validate()?;

    let mut user = load_user(&state, auth.id()).await?;
    user.full_name = body.full_name;
    user.username = normalize_key(&body.username);
    user.email = normalize_key(&body.email);
    state.store.save(&mut user).await?;

    Ok(ApiResponse::ok(
        "Account details updated successfully",
        user.profile(),
    ))
}

/// Which image an upload replaces.
#[derive(Debug, Clone, Copy)]
enum ImageSlot {
    Avatar,
    CoverImage,
}

impl ImageSlot {
    fn field(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "coverImage",
        }
    }
}

async fn replace_image(
    state: &AppState,
    auth: &AuthUser,
    multipart: Multipart,
    slot: ImageSlot,
) -> Result<UserProfile> {
    let mut form = UploadForm::read(multipart, &state.config.upload_dir).await?;
    let file = form
        .take_file(slot.field())
        .ok_or_else(|| AppError::Validation(format!("{} file is missing", slot.field())))?;

    let uploaded = upload_staged(state.media.as_ref(), file).await?;

    let mut user = load_user(state, auth.id()).await?;
    match slot {
        ImageSlot::Avatar => user.avatar = uploaded.url,
        ImageSlot::CoverImage => user.cover_image = Some(uploaded.url),
    }
    state.store.save(&mut user).await?;

    Ok(user.profile())
}

async fn update_avatar(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> Result<ApiResponse<UserProfile>> {
    let profile = replace_image(&state, &auth, multipart, ImageSlot::Avatar).await?;
    Ok(ApiResponse::ok("Avatar updated successfully", profile))
}

async fn update_cover_image(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> Result<ApiResponse<UserProfile>> {
    let profile = replace_image(&state, &auth, multipart, ImageSlot::CoverImage).await?;
    Ok(ApiResponse::ok("Cover image updated successfully", profile))
}
