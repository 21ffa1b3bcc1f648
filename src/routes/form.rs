// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Request body helpers: multipart forms with staged files, and JSON bodies
//! whose rejections use the standard error envelope.

use crate::error::AppError;
use crate::services::StagedFile;
use axum::extract::{FromRequest, Multipart, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;

/// A parsed multipart form. File parts are already staged on disk.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    files: HashMap<String, StagedFile>,
}

impl UploadForm {
    /// Read every part of `multipart`, staging file parts into `upload_dir`.
    ///
    /// Empty file parts (a form submitted without choosing a file) are ignored.
    /// Stream errors keep their status, so an oversized upload is a 413.
    pub async fn read(mut multipart: Multipart, upload_dir: &Path) -> Result<Self, AppError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await?;
                    if bytes.is_empty() {
                        continue;
                    }
                    let staged = StagedFile::write(upload_dir, &file_name, &bytes).await?;
                    form.files.insert(name, staged);
                }
                None => {
                    let text = field.text().await?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    /// Text field value, or an empty string if absent.
    pub fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    pub fn take_file(&mut self, name: &str) -> Option<StagedFile> {
        self.files.remove(name)
    }
}

/// Fail with a validation error if any named value is blank after trimming.
pub fn require_present(values: &[(&str, &str)]) -> Result<(), AppError> {
    let missing: Vec<&str> = values
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// `Json<T>` whose rejection is an [`AppError`] with the rejection's status.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}
