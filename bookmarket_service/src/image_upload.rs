//! Validation and decoding of images sent inline with listing forms.

use base64::Engine;

use crate::api::ImageUpload;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ImageUploadError {
    #[error("Image is not valid base64")]
    InvalidEncoding,

    #[error("Image has {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Image is empty")]
    Empty,
}

/// Image ready to be sent to object storage
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PreparedImage {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
}

pub fn allowed_file(filename: &str) -> bool {
    extension(filename)
        .map(|extension| ALLOWED_EXTENSIONS.contains(&extension.as_str()))
        .unwrap_or_default()
}

/// Keeps ascii alphanumerics, `.`, `_` and `-`, whitespace becomes `_`,
/// anything else is dropped together with leading dots
pub fn secure_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

fn content_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Returns None when the extension is not allowed, such images are skipped
pub fn prepare_upload(
    upload: &ImageUpload,
    max_bytes: usize,
) -> Result<Option<PreparedImage>, ImageUploadError> {
    if !allowed_file(&upload.filename) {
        tracing::warn!("Skipping image {} with unsupported extension", upload.filename);
        return Ok(None);
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(upload.content_base64.trim())
        .map_err(|_| ImageUploadError::InvalidEncoding)?;
    if bytes.is_empty() {
        return Err(ImageUploadError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(ImageUploadError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let filename = format!(
        "{}_{}",
        uuid::Uuid::new_v4().simple(),
        secure_filename(&upload.filename)
    );
    Ok(Some(PreparedImage {
        content_type: content_type(&filename),
        filename,
        bytes,
    }))
}
