// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// User record as persisted by the credential store.
///
/// Never serialized into an API response; use [`UserProfile`] for that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Opaque UUID, also used as document ID
    pub id: String,
    /// Lowercase, unique
    pub username: String,
    /// Lowercase, unique
    pub email: String,
    pub full_name: String,
    /// bcrypt hash; empty only while a pending password awaits its first write
    pub password_hash: String,
    /// Media host URL
    pub avatar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub watch_history: Vec<String>,
    /// Current refresh token; absent when logged out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,

    /// Plaintext set through [`User::set_password`], hashed by the store on save.
    #[serde(skip)]
    pending_password: Option<String>,
}

impl User {
    /// Build a new user from validated registration fields.
    pub fn new(fields: NewUser) -> Self {
        let now = now_rfc3339();
        let mut user = Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: normalize_key(&fields.username),
            email: normalize_key(&fields.email),
            full_name: fields.full_name.trim().to_string(),
            password_hash: String::new(),
            avatar: fields.avatar,
            cover_image: fields.cover_image,
            watch_history: Vec::new(),
            refresh_token: None,
            created_at: now.clone(),
            updated_at: now,
            pending_password: None,
        };
        user.set_password(fields.password);
        user
    }

    /// Record a new plaintext password. The store replaces it with a hash on the next write.
    pub fn set_password(&mut self, plaintext: impl Into<String>) {
        self.pending_password = Some(plaintext.into());
    }

    /// Take the pending plaintext password, if any.
    pub fn take_pending_password(&mut self) -> Option<String> {
        self.pending_password.take()
    }

    pub fn has_pending_password(&self) -> bool {
        self.pending_password.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }

    /// Projection safe to return to clients.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar: self.avatar.clone(),
            cover_image: self.cover_image.clone(),
            watch_history: self.watch_history.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

/// Lowercase and trim a unique key (username or email).
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Registration fields after the multipart form has been parsed and media uploaded.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub avatar: String,
    pub cover_image: Option<String>,
}

/// Text fields of a registration form, validated before anything is uploaded.
#[derive(Debug, Clone, Default, Validate)]
pub struct RegistrationFields {
    #[validate(length(min = 3, max = 30, message = "must be 3-30 characters"))]
    pub username: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "must be at most 100 characters"))]
    pub full_name: String,
    #[validate(length(min = 6, max = 1024, message = "must be 6-1024 characters"))]
    pub password: String,
}

/// Public view of a user: no password hash, no refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub watch_history: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}
