// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process credential store backed by `DashMap`.
//!
//! Used by the test suite and for running locally without Firestore. Unique
//! keys are claimed through map entries, so two concurrent registrations for
//! the same username cannot both succeed.

use crate::db::{duplicate_user, not_found, UserStore};
use crate::error::AppError;
use crate::models::user::normalize_key;
use crate::models::User;
use crate::services::password::hash_pending_password;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory credential store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<DashMap<String, User>>,
    usernames: Arc<DashMap<String, String>>,
    emails: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Claim `key` for `id`. Claiming a key already owned by `id` is a no-op.
fn claim(index: &DashMap<String, String>, key: &str, id: &str) -> Result<(), AppError> {
    match index.entry(key.to_string()) {
        Entry::Occupied(entry) if entry.get() != id => Err(duplicate_user()),
        Entry::Occupied(_) => Ok(()),
        Entry::Vacant(entry) => {
            entry.insert(id.to_string());
            Ok(())
        }
    }
}

fn release(index: &DashMap<String, String>, key: &str, id: &str) {
    index.remove_if(key, |_, owner| owner == id);
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, AppError> {
        let by_username = username
            .map(normalize_key)
            .filter(|k| !k.is_empty())
            .and_then(|k| self.usernames.get(&k).map(|id| id.value().clone()));
        let id = by_username.or_else(|| {
            email
                .map(normalize_key)
                .filter(|k| !k.is_empty())
                .and_then(|k| self.emails.get(&k).map(|id| id.value().clone()))
        });

        Ok(id.and_then(|id| self.users.get(&id).map(|u| u.value().clone())))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn create(&self, mut user: User) -> Result<User, AppError> {
        hash_pending_password(&mut user).await?;

        claim(&self.usernames, &user.username, &user.id)?;
        if let Err(e) = claim(&self.emails, &user.email, &user.id) {
            release(&self.usernames, &user.username, &user.id);
            return Err(e);
        }

        self.users.insert(user.id.clone(), user.clone());
        tracing::debug!(user_id = %user.id, "User created (memory)");
        Ok(user)
    }

    async fn save(&self, user: &mut User) -> Result<(), AppError> {
        hash_pending_password(user).await?;

        // The user's shard stays locked from the existence check through the
        // write, so a concurrent delete cannot strand freshly claimed keys.
        let mut stored = self
            .users
            .get_mut(&user.id)
            .ok_or_else(|| not_found(&user.id))?;

        let previous_username = stored.username.clone();
        let previous_email = stored.email.clone();
        let username_changed = previous_username != user.username;
        let email_changed = previous_email != user.email;

        if username_changed {
            claim(&self.usernames, &user.username, &user.id)?;
        }
        if email_changed {
            if let Err(e) = claim(&self.emails, &user.email, &user.id) {
                if username_changed {
                    release(&self.usernames, &user.username, &user.id);
                }
                return Err(e);
            }
        }

        user.touch();
        user.refresh_token = stored.refresh_token.clone();
        *stored = user.clone();
        drop(stored);

        if username_changed {
            release(&self.usernames, &previous_username, &user.id);
        }
        if email_changed {
            release(&self.emails, &previous_email, &user.id);
        }
        Ok(())
    }

    async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<(), AppError> {
        let mut stored = self.users.get_mut(id).ok_or_else(|| not_found(id))?;
        stored.refresh_token = token.map(str::to_string);
        stored.touch();
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: &str,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, AppError> {
        // The shard write lock is held across compare and set.
        let Some(mut stored) = self.users.get_mut(id) else {
            return Ok(false);
        };
        if stored.refresh_token.as_deref() != Some(expected) {
            return Ok(false);
        }
        stored.refresh_token = Some(replacement.to_string());
        stored.touch();
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        match self.users.remove(id) {
            Some((_, user)) => {
                release(&self.usernames, &user.username, id);
                release(&self.emails, &user.email, id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
