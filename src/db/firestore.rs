// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed credential store.
//!
//! Layout:
//! - `users/{id}` holds the user record
//! - `usernames/{username}` and `emails/{email}` are unique-key documents
//!   pointing at the owning user id
//!
//! Unique keys are claimed with create-only inserts, so Firestore itself
//! rejects the second of two racing registrations. A claim left behind by a
//! create that died before writing its user document is reclaimed once it is
//! older than [`ORPHAN_CLAIM_SECS`].

use crate::db::{collections, duplicate_user, not_found, UserStore};
use crate::error::AppError;
use crate::models::user::normalize_key;
use crate::models::User;
use crate::services::password::hash_pending_password;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use firestore::errors::FirestoreError;
use firestore::{FirestoreConsistencySelector, FirestoreWritePrecondition};
use serde::{Deserialize, Serialize};

/// Fields written by [`UserStore::save`]. Never includes the refresh token.
const PROFILE_FIELDS: [&str; 8] = [
    "username",
    "email",
    "full_name",
    "password_hash",
    "avatar",
    "cover_image",
    "watch_history",
    "updated_at",
];

const SESSION_FIELDS: [&str; 2] = ["refresh_token", "updated_at"];

/// Age after which a unique-key claim without a user document is an orphan.
const ORPHAN_CLAIM_SECS: i64 = 600;

/// Owner of a unique username/email.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyOwner {
    user_id: String,
    #[serde(default)]
    claimed_at: String,
}

impl KeyOwner {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            claimed_at: now_rfc3339(),
        }
    }

    /// Claims with a missing or unparseable timestamp count as old.
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.claimed_at)
            .map(|at| now.signed_duration_since(at) > chrono::Duration::seconds(ORPHAN_CLAIM_SECS))
            .unwrap_or(true)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Map a failed write to a user document. `Exists(true)` preconditions
/// surface as not-found.
fn write_error(id: &str, err: FirestoreError) -> AppError {
    match err {
        FirestoreError::DataNotFoundError(_) => not_found(id),
        e => AppError::Database(e.to_string()),
    }
}

/// Partial document used to set or unset the refresh token.
#[derive(Debug, Serialize, Deserialize)]
struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    updated_at: String,
}

impl SessionPatch {
    fn new(token: Option<&str>) -> Self {
        Self {
            refresh_token: token.map(str::to_string),
            updated_at: now_rfc3339(),
        }
    }
}

fn key_doc_id(key: &str) -> String {
    urlencoding::encode(&normalize_key(key)).into_owned()
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(project = project_id, "Connected to Firestore emulator");

        Ok(Self { client })
    }

    // ─── Unique Keys ─────────────────────────────────────────────

    /// Claim a unique key for a user. Fails with `Conflict` if another user holds it.
    async fn claim_key(&self, collection: &str, key: &str, user_id: &str) -> Result<(), AppError> {
        let owner = KeyOwner::new(user_id);

        let result: Result<KeyOwner, FirestoreError> = self
            .client
            .fluent()
            .insert()
            .into(collection)
            .document_id(key_doc_id(key))
            .object(&owner)
            .execute()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(FirestoreError::DataConflictError(_)) => {
                if self.reclaim_orphaned_key(collection, key, user_id).await? {
                    return Ok(());
                }
                tracing::debug!(collection, "Unique key already claimed");
                Err(duplicate_user())
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Take over a stale claim whose owner never got a user document.
    ///
    /// Runs in a transaction, so of two callers reclaiming the same key only
    /// one commit succeeds.
    async fn reclaim_orphaned_key(
        &self,
        collection: &str,
        key: &str,
        user_id: &str,
    ) -> Result<bool, AppError> {
        let doc_id = key_doc_id(key);
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        let tx_client = self.client.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );

        let owner: Option<KeyOwner> = tx_client
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(&doc_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let orphaned = match &owner {
            Some(owner) if owner.user_id != user_id && owner.is_stale(Utc::now()) => {
                let user: Option<User> = tx_client
                    .fluent()
                    .select()
                    .by_id_in(collections::USERS)
                    .obj()
                    .one(&owner.user_id)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                user.is_none()
            }
            _ => false,
        };

        if !orphaned {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        self.client
            .fluent()
            .update()
            .in_col(collection)
            .document_id(&doc_id)
            .object(&KeyOwner::new(user_id))
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Failed to add key to transaction: {}", e)))?;

        match transaction.commit().await {
            Ok(_) => {
                tracing::warn!(collection, user_id, "Reclaimed orphaned unique key");
                Ok(true)
            }
            Err(e) => {
                tracing::debug!(error = %e, collection, "Lost race reclaiming unique key");
                Ok(false)
            }
        }
    }

    async fn key_owner(&self, collection: &str, key: &str) -> Result<Option<String>, AppError> {
        let owner: Option<KeyOwner> = self
            .client
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(&key_doc_id(key))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(owner.map(|o| o.user_id))
    }

    /// Release a unique key, but only if `user_id` still owns it.
    async fn release_key(&self, collection: &str, key: &str, user_id: &str) {
        let owned = match self.key_owner(collection, key).await {
            Ok(owner) => owner.as_deref() == Some(user_id),
            Err(e) => {
                tracing::warn!(error = %e, collection, "Failed to read unique key for release");
                return;
            }
        };
        if !owned {
            return;
        }

        if let Err(e) = self
            .client
            .fluent()
            .delete()
            .from(collection)
            .document_id(key_doc_id(key))
            .execute()
            .await
        {
            tracing::warn!(error = %e, collection, user_id, "Failed to release unique key");
        }
    }
}

#[async_trait]
impl UserStore for FirestoreDb {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, AppError> {
        let mut owner = None;
        if let Some(username) = username.filter(|u| !u.trim().is_empty()) {
            owner = self.key_owner(collections::USERNAMES, username).await?;
        }
        if owner.is_none() {
            if let Some(email) = email.filter(|e| !e.trim().is_empty()) {
                owner = self.key_owner(collections::EMAILS, email).await?;
            }
        }

        match owner {
            Some(id) => self.find_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        self.client
            .fluent()
            .select()
            .from(collections::USERS)
            .order_by([("created_at", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn create(&self, mut user: User) -> Result<User, AppError> {
        hash_pending_password(&mut user).await?;

        self.claim_key(collections::USERNAMES, &user.username, &user.id)
            .await?;
        if let Err(e) = self
            .claim_key(collections::EMAILS, &user.email, &user.id)
            .await
        {
            self.release_key(collections::USERNAMES, &user.username, &user.id)
                .await;
            return Err(e);
        }

        let written: Result<User, FirestoreError> = self
            .client
            .fluent()
            .insert()
            .into(collections::USERS)
            .document_id(&user.id)
            .object(&user)
            .execute()
            .await;

        if let Err(e) = written {
            self.release_key(collections::USERNAMES, &user.username, &user.id)
                .await;
            self.release_key(collections::EMAILS, &user.email, &user.id)
                .await;
            return Err(AppError::Database(e.to_string()));
        }

        tracing::info!(user_id = %user.id, "User created");
        Ok(user)
    }

    async fn save(&self, user: &mut User) -> Result<(), AppError> {
        hash_pending_password(user).await?;

        let previous = self
            .find_by_id(&user.id)
            .await?
            .ok_or_else(|| not_found(&user.id))?;

        let username_changed = previous.username != user.username;
        let email_changed = previous.email != user.email;

        if username_changed {
            self.claim_key(collections::USERNAMES, &user.username, &user.id)
                .await?;
        }
        if email_changed {
            if let Err(e) = self
                .claim_key(collections::EMAILS, &user.email, &user.id)
                .await
            {
                if username_changed {
                    self.release_key(collections::USERNAMES, &user.username, &user.id)
                        .await;
                }
                return Err(e);
            }
        }

        user.touch();
        let written: Result<(), FirestoreError> = self
            .client
            .fluent()
            .update()
            .fields(PROFILE_FIELDS)
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(&user.id)
            .object(&*user)
            .execute()
            .await;

        if let Err(e) = written {
            if username_changed {
                self.release_key(collections::USERNAMES, &user.username, &user.id)
                    .await;
            }
            if email_changed {
                self.release_key(collections::EMAILS, &user.email, &user.id)
                    .await;
            }
            return Err(write_error(&user.id, e));
        }
        user.refresh_token = previous.refresh_token;

        if username_changed {
            self.release_key(collections::USERNAMES, &previous.username, &user.id)
                .await;
        }
        if email_changed {
            self.release_key(collections::EMAILS, &previous.email, &user.id)
                .await;
        }
        Ok(())
    }

    async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .fields(SESSION_FIELDS)
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(id)
            .object(&SessionPatch::new(token))
            .execute()
            .await
            .map_err(|e| write_error(id, e))?;
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: &str,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, AppError> {
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Reading through the transaction registers the document, so a
        // concurrent rotation makes the commit fail instead of overwriting.
        let tx_client = self.client.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );
        let current: Option<User> = tx_client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let matches = current
            .as_ref()
            .and_then(|u| u.refresh_token.as_deref())
            .map(|stored| stored == expected)
            .unwrap_or(false);

        if !matches {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        self.client
            .fluent()
            .update()
            .fields(SESSION_FIELDS)
            .in_col(collections::USERS)
            .document_id(id)
            .object(&SessionPatch::new(Some(replacement)))
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add session to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let Some(user) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        self.client
            .fluent()
            .delete()
            .from(collections::USERS)
            .document_id(id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.release_key(collections::USERNAMES, &user.username, id)
            .await;
        self.release_key(collections::EMAILS, &user.email, id).await;

        tracing::info!(user_id = %id, "User deleted");
        Ok(true)
    }
}
