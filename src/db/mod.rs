// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential store: the only component that persists users.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::User;
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Unique-key documents: lowercase username -> user id
    pub const USERNAMES: &str = "usernames";
    /// Unique-key documents: lowercase email -> user id
    pub const EMAILS: &str = "emails";
}

/// Persistence boundary for user records.
///
/// Implementations enforce username/email uniqueness themselves and hash any
/// pending password (see [`crate::services::password::hash_pending_password`])
/// before a user is written.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by username or email (either may be omitted). Case-insensitive.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError>;

    async fn list(&self) -> Result<Vec<User>, AppError>;

    /// Insert a new user. Fails with `Conflict` if the username or email is taken.
    async fn create(&self, user: User) -> Result<User, AppError>;

    /// Write an existing user, hashing a pending password and moving unique keys if they changed.
    ///
    /// The stored refresh token is preserved; only the refresh token operations change it.
    async fn save(&self, user: &mut User) -> Result<(), AppError>;

    /// Set or remove the stored refresh token. Only `refresh_token` and `updated_at` change.
    async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<(), AppError>;

    /// Replace the stored refresh token only if it still equals `expected`.
    ///
    /// Returns `false` when the stored value differs (already rotated or logged out).
    async fn swap_refresh_token(
        &self,
        id: &str,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, AppError>;

    /// Hard-delete a user. Returns `false` if no such user exists.
    async fn delete(&self, id: &str) -> Result<bool, AppError>;
}

pub(crate) fn duplicate_user() -> AppError {
    AppError::Conflict("User with this username or email already exists".to_string())
}

pub(crate) fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("User {} not found", id))
}
