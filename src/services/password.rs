// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! bcrypt password hashing.
//!
//! Hashing is CPU-bound, so both directions run on the blocking pool.

use crate::error::AppError;
use crate::models::User;

/// bcrypt cost factor for stored passwords.
pub const HASH_COST: u32 = 10;

/// Hash a plaintext password.
pub async fn hash_password(plaintext: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, HASH_COST))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("hash task failed: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

/// Compare a plaintext password against the user's stored hash.
pub async fn verify_password(user: &User, plaintext: &str) -> Result<bool, AppError> {
    if user.password_hash.is_empty() {
        return Ok(false);
    }

    let hash = user.password_hash.clone();
    let plaintext = plaintext.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hash))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("verify task failed: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password verification failed: {}", e)))
}

/// Replace a pending plaintext password with its hash.
///
/// Returns `true` if the user had a pending password. A user without one is
/// left untouched so re-saving never re-hashes an existing hash.
pub async fn hash_pending_password(user: &mut User) -> Result<bool, AppError> {
    match user.take_pending_password() {
        Some(plaintext) => {
            user.password_hash = hash_password(plaintext).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
