// livegate/src/pipeline/upload.rs
//
// Image acquisition.
//
// Two upload shapes, chosen by the `base64` query flag:
//   multipart  : form upload; the first part carrying a filename wins,
//                otherwise the first part
//   base64     : JSON body {"image": "<base64>"}; whitespace and a
//                `data:...;base64,` prefix are tolerated, padding optional
//
// Decoding never aborts a request. Any failure is logged and the request
// carries on with an empty image, which the engine then rejects with a read
// error that ends up in the `state` field.

use axum::body::{Body, Bytes};
use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::rejection::{BytesRejection, FailedToBufferBody};
use axum::extract::{FromRequest, Request};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A not-yet-read upload. Nothing is pulled off the wire until `acquire`.
pub enum ImageUpload {
    Multipart(Multipart),
    /// Whole request; the body is buffered up to the router's body limit.
    Base64Json(Request<Body>),
    /// The transport could not frame the upload at all (wrong content type,
    /// missing boundary); carries the reason.
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("multipart upload rejected: {0}")]
    Rejected(String),

    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("multipart upload has no parts")]
    NoParts,

    #[error("failed to read request body: {0}")]
    Body(BytesRejection),

    #[error("request body exceeds the size limit")]
    TooLarge,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON body has no string field \"image\"")]
    MissingImage,

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Read the upload and return the raw image bytes, or an empty buffer when
/// the upload cannot be decoded.
pub async fn acquire(upload: ImageUpload) -> Vec<u8> {
    match decode(upload).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "upload not decodable; continuing with an empty image");
            Vec::new()
        }
    }
}

pub async fn decode(upload: ImageUpload) -> Result<Vec<u8>, UploadError> {
    match upload {
        ImageUpload::Multipart(multipart) => from_multipart(multipart).await,
        ImageUpload::Base64Json(request) => {
            let raw = Bytes::from_request(request, &()).await.map_err(|rejection| match rejection {
                BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
                    UploadError::TooLarge
                }
                other => UploadError::Body(other),
            })?;
            decode_base64_json(&raw)
        }
        ImageUpload::Rejected(reason) => Err(UploadError::Rejected(reason)),
    }
}

async fn from_multipart(mut multipart: Multipart) -> Result<Vec<u8>, UploadError> {
    let mut first = None;
    while let Some(field) = multipart.next_field().await? {
        let is_file = field.file_name().is_some();
        let data = field.bytes().await?;
        if is_file {
            return Ok(data.to_vec());
        }
        if first.is_none() {
            first = Some(data.to_vec());
        }
    }
    first.ok_or(UploadError::NoParts)
}

pub fn decode_base64_json(raw: &[u8]) -> Result<Vec<u8>, UploadError> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let encoded = value["image"].as_str().ok_or(UploadError::MissingImage)?;
    decode_base64(encoded)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, UploadError> {
    let payload = match encoded.find(";base64,") {
        Some(idx) if encoded.starts_with("data:") => &encoded[idx + 8..],
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(LENIENT_BASE64.decode(compact.as_bytes())?)
}
