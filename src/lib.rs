// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Account API: user registration, login and JWT session management
//!
//! Access tokens are short-lived and stateless; refresh tokens are rotated on
//! every use and checked against the single session stored on each user.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::UserStore;
use services::{MediaUploader, TokenService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn UserStore>,
    pub tokens: TokenService,
    pub media: Arc<dyn MediaUploader>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn UserStore>, media: Arc<dyn MediaUploader>) -> Self {
        let tokens = TokenService::from_config(&config);
        Self {
            config,
            store,
            tokens,
            media,
        }
    }
}
