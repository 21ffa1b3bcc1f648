// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod response;
pub mod user;

pub use response::ApiResponse;
pub use user::{NewUser, RegistrationFields, User, UserProfile};
