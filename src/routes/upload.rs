use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::Multipart;
use image::ImageFormat;

use crate::routes::error::{ApiError, ApiResult};

/// Field names accepted for the uploaded image.
const FILE_FIELDS: [&str; 2] = ["file", "image"];

/// An uploaded file part.
#[derive(Debug)]
pub struct Upload {
    pub filename: Option<String>,
    pub data: Bytes,
}

/// A parsed multipart form: at most one file plus text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<Upload>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if FILE_FIELDS.contains(&name.as_str()) {
                let filename = field.file_name().map(str::to_string);
                let data = field.bytes().await?;
                form.file = Some(Upload { filename, data });
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// A text field exactly as sent.
    pub fn raw_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// A text field, with surrounding whitespace removed. Blank counts as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The uploaded file, which must be a recognizable image.
    pub fn image(&self) -> ApiResult<(&Upload, ImageFormat)> {
        let upload = self
            .file
            .as_ref()
            .ok_or_else(|| ApiError::Validation("No image file provided".to_string()))?;

        if upload.data.is_empty() {
            return Err(ApiError::Validation("Uploaded file is empty".to_string()));
        }

        let format = image::guess_format(&upload.data).map_err(|_| {
            ApiError::UnsupportedMedia("Uploaded file is not a supported image".to_string())
        })?;
        Ok((upload, format))
    }
}

/// File extension used when storing an image of `format`.
pub fn extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}
