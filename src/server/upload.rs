//! Multipart upload validation.

use crate::constants::upload::FIELD_NAME;
use crate::error::PredictError;
use axum::extract::Multipart;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};

/// Pull the single image field out of a multipart body.
///
/// Exactly one `image` field is accepted, it must be non-empty and at most
/// `max_bytes` long. The size check runs per chunk so an oversized upload is
/// rejected before it is fully buffered.
pub async fn read_image(
    multipart: Result<Multipart, MultipartRejection>,
    max_bytes: usize,
) -> Result<Bytes, PredictError> {
    let mut multipart = multipart.map_err(|e| {
        PredictError::bad_request(format!("expected a multipart/form-data body: {}", e.body_text()))
    })?;

    let mut image: Option<Bytes> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e, max_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != FIELD_NAME {
            return Err(PredictError::bad_request(format!(
                "unexpected form field '{name}', send the file as '{FIELD_NAME}'"
            )));
        }
        if image.is_some() {
            return Err(PredictError::bad_request(format!(
                "exactly one '{FIELD_NAME}' field is allowed"
            )));
        }

        if let Some(content_type) = field.content_type()
            && !accepted_content_type(content_type)
        {
            return Err(PredictError::bad_request(format!(
                "'{FIELD_NAME}' must be an image, got {content_type}"
            )));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(&e, max_bytes))?
        {
            if buf.len() + chunk.len() > max_bytes {
                return Err(PredictError::too_large(max_bytes));
            }
            buf.extend_from_slice(&chunk);
        }

        if buf.is_empty() {
            return Err(PredictError::bad_request(format!("'{FIELD_NAME}' is empty")));
        }
        image = Some(buf.freeze());
    }

    image.ok_or_else(|| PredictError::bad_request(format!("missing '{FIELD_NAME}' field")))
}

/// Image types plus the generic binary type clients send when they do not
/// know better. Decoding decides the rest.
fn accepted_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("image/") || essence == "application/octet-stream"
}

fn multipart_error(e: &MultipartError, max_bytes: usize) -> PredictError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PredictError::too_large(max_bytes)
    } else {
        PredictError::bad_request(format!("malformed multipart body: {}", e.body_text()))
    }
}
