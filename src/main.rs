// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account API Server
//!
//! User registration, login and JWT session management with media uploads.

use account_api::{
    config::{Config, StoreKind},
    db::{FirestoreDb, MemoryStore, UserStore},
    services::{CloudinaryClient, MediaUploader},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting account API");

    let store: Arc<dyn UserStore> = match config.store {
        StoreKind::Firestore => Arc::new(FirestoreDb::new(&config.gcp_project_id).await?),
        StoreKind::Memory => {
            tracing::warn!("Using in-memory user store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let media: Arc<dyn MediaUploader> = Arc::new(CloudinaryClient::new(&config)?);
    tracing::info!(cloud = %config.cloudinary_cloud_name, "Media client initialized");

    let state = Arc::new(AppState::new(config.clone(), store, media));

    // Build router
    let app = account_api::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("account_api=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
