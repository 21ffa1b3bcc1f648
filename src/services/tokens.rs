// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access/refresh token minting, verification and rotation.
//!
//! Access tokens are stateless: a valid signature and an unexpired `exp` are
//! enough. Refresh tokens are signed with a separate key and must also equal
//! the token stored on the user record. That stored copy is the only
//! revocation mechanism: logout removes it and every rotation replaces it, so
//! an older refresh token stops working even though its signature is valid.

use crate::config::Config;
use crate::db::UserStore;
use crate::error::AppError;
use crate::models::User;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    /// User ID
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    /// Issued at (Unix timestamp)
    pub iat: usize,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
}

/// Claims carried by a refresh token. Minimal: no profile data.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefreshClaims {
    /// User ID
    pub id: String,
    /// Unique token ID, so two tokens minted in the same second still differ
    pub jti: String,
    pub iat: usize,
    pub exp: usize,
}

/// A freshly issued access/refresh token pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Which token a verification failure is about; shapes the error message.
#[derive(Debug, Clone, Copy)]
enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn label(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

fn verification_error(kind: TokenKind, err: &jsonwebtoken::errors::Error) -> AppError {
    match err.kind() {
        ErrorKind::ExpiredSignature => {
            AppError::unauthorized(format!("Unauthorized - {} token expired", kind.label()))
        }
        _ => AppError::unauthorized(format!("Unauthorized - invalid {} token", kind.label())),
    }
}

fn invalid_refresh_token() -> AppError {
    AppError::unauthorized("Unauthorized - invalid refresh token")
}

fn now_secs() -> Result<usize, AppError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_secs() as usize)
}

/// `exp` for a token issued at `now`; fails instead of overflowing on huge lifetimes.
fn expires_at(now: usize, ttl: Duration) -> Result<usize, AppError> {
    usize::try_from(ttl.as_secs())
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Token lifetime out of range")))
}

/// Mints and verifies the two token kinds.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.access_token_secret,
            &config.refresh_token_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation
    }

    /// Sign an access token carrying the user's public identity.
    pub fn mint_access_token(&self, user: &User) -> Result<String, AppError> {
        let now = now_secs()?;
        let claims = AccessClaims {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            iat: now,
            exp: expires_at(now, self.access_ttl)?,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Access token signing failed: {}", e)))
    }

    /// Sign a refresh token carrying only the user ID.
    pub fn mint_refresh_token(&self, user: &User) -> Result<String, AppError> {
        let now = now_secs()?;
        let claims = RefreshClaims {
            id: user.id.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: expires_at(now, self.refresh_ttl)?,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Refresh token signing failed: {}", e)))
    }

    /// Check signature and expiry of an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AppError> {
        if token.trim().is_empty() {
            return Err(AppError::unauthorized("Unauthorized - No token provided"));
        }

        decode::<AccessClaims>(token, &self.access_decoding, &Self::validation())
            .map(|data| data.claims)
            .map_err(|e| verification_error(TokenKind::Access, &e))
    }

    /// Check signature and expiry of a refresh token without consulting the store.
    pub fn decode_refresh_token(&self, token: &str) -> Result<RefreshClaims, AppError> {
        if token.trim().is_empty() {
            return Err(AppError::unauthorized("Unauthorized - No refresh token provided"));
        }

        decode::<RefreshClaims>(token, &self.refresh_decoding, &Self::validation())
            .map(|data| data.claims)
            .map_err(|e| verification_error(TokenKind::Refresh, &e))
    }

    /// Fully verify a refresh token: signature, expiry, and equality with the stored token.
    ///
    /// A stored value that is missing or different (logged out, rotated
    /// elsewhere) fails even if the signature is still valid.
    pub async fn verify_refresh_token(
        &self,
        store: &dyn UserStore,
        token: &str,
    ) -> Result<User, AppError> {
        let claims = self.decode_refresh_token(token)?;

        let user = store
            .find_by_id(&claims.id)
            .await?
            .ok_or_else(invalid_refresh_token)?;

        let matches = user
            .refresh_token
            .as_deref()
            .map(|stored| bool::from(stored.as_bytes().ct_eq(token.as_bytes())))
            .unwrap_or(false);

        if !matches {
            tracing::warn!(user_id = %user.id, "Refresh token does not match stored session");
            return Err(invalid_refresh_token());
        }

        Ok(user)
    }

    /// Mint a pair for a user and persist the refresh token.
    ///
    /// If persisting fails, no tokens are returned.
    pub async fn issue_pair(&self, store: &dyn UserStore, user_id: &str) -> Result<TokenPair, AppError> {
        let user = store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let pair = TokenPair {
            access_token: self.mint_access_token(&user)?,
            refresh_token: self.mint_refresh_token(&user)?,
        };

        store
            .set_refresh_token(&user.id, Some(&pair.refresh_token))
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user.id, error = %e, "Failed to persist refresh token");
                AppError::Internal(anyhow::anyhow!("Failed to persist refresh token: {}", e))
            })?;

        Ok(pair)
    }

    /// Exchange a valid refresh token for a new pair, invalidating the presented token.
    ///
    /// The stored token is replaced with compare-and-swap, so of two
    /// concurrent rotations with the same token only one succeeds.
    pub async fn rotate(&self, store: &dyn UserStore, token: &str) -> Result<TokenPair, AppError> {
        let user = self.verify_refresh_token(store, token).await?;

        let pair = TokenPair {
            access_token: self.mint_access_token(&user)?,
            refresh_token: self.mint_refresh_token(&user)?,
        };

        let swapped = store
            .swap_refresh_token(&user.id, token, &pair.refresh_token)
            .await?;
        if !swapped {
            tracing::warn!(user_id = %user.id, "Refresh token rotated concurrently");
            return Err(invalid_refresh_token());
        }

        tracing::info!(user_id = %user.id, "Refresh token rotated");
        Ok(pair)
    }
}
