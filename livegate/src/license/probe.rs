// livegate/src/license/probe.rs
//
// License probe: one read of the installed license.
//
// Format: a JSON document on disk.
//   {"product": "liveness-face", "expires": 1767225600, "issued_to": "acme",
//    "signature": "<hex>"}
// `expires` is unix seconds; null (or absent) means no limit.
//
// Signing: hex(HMAC-SHA256(canonical_payload_json, key)), where the canonical
// payload is the document without `signature`. When a key is configured the
// signature is mandatory and compared in constant time; without a key the
// file is trusted as-is.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};

use super::{no_limit_sentinel, LicenseError, LicenseStatus};

type HmacSha256 = Hmac<sha2::Sha256>;

/// One license read. Implementations must be cheap enough to call every
/// polling interval and must not block for long.
pub trait LicenseProbe: Send + Sync + 'static {
    fn probe(&self) -> Result<LicenseStatus, LicenseError>;
}

// ── File format ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseFile {
    #[serde(flatten)]
    pub payload:   LicensePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Signed portion of the license. Field order is the canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePayload {
    pub product:   String,
    #[serde(default)]
    pub expires:   Option<i64>,
    #[serde(default)]
    pub issued_to: Option<String>,
}

impl LicensePayload {
    fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn sign(self, key: &[u8]) -> LicenseFile {
        let signature = hmac_sign(self.canonical().as_bytes(), key);
        LicenseFile { payload: self, signature: Some(signature) }
    }
}

impl LicenseFile {
    /// Verify the HMAC signature. Constant-time comparison.
    pub fn verify(&self, key: &[u8]) -> Result<(), LicenseError> {
        let given = self.signature.as_deref().ok_or(LicenseError::Unsigned)?;
        let expected = hmac_sign(self.payload.canonical().as_bytes(), key);
        let a = expected.as_bytes();
        let b = given.trim().to_ascii_lowercase().into_bytes();
        if a.len() != b.len() {
            return Err(LicenseError::BadSignature);
        }
        let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
        if diff == 0 { Ok(()) } else { Err(LicenseError::BadSignature) }
    }

    pub fn into_status(self) -> Result<LicenseStatus, LicenseError> {
        let expires_at = match self.payload.expires {
            None       => no_limit_sentinel(),
            Some(secs) => Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or(LicenseError::BadExpiry(secs))?,
        };
        Ok(LicenseStatus {
            product:   self.payload.product,
            expires_at,
            issued_to: self.payload.issued_to,
        })
    }
}

fn hmac_sign(data: &[u8], key: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m)  => m,
        Err(_) => return String::new(),
    };
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

// ── File probe ────────────────────────────────────────────────────────────────

pub struct FileLicenseProbe {
    path:    PathBuf,
    product: String,
    key:     Option<Vec<u8>>,
}

impl FileLicenseProbe {
    pub fn new(path: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self { path: path.into(), product: product.into(), key: None }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }
}

impl LicenseProbe for FileLicenseProbe {
    fn probe(&self) -> Result<LicenseStatus, LicenseError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LicenseError::NotInstalled(self.path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let file: LicenseFile = serde_json::from_slice(&raw)?;

        if let Some(key) = &self.key {
            file.verify(key)?;
        }
        if !file.payload.product.eq_ignore_ascii_case(&self.product) {
            return Err(LicenseError::WrongProduct {
                expected: self.product.clone(),
                found:    file.payload.product,
            });
        }
        file.into_status()
    }
}
