// livegate/src/license/mod.rs
//
// License state: the status record, the probe that reads it, the store that
// publishes it, and the monitor that keeps the store fresh.

pub mod monitor;
pub mod probe;
pub mod store;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use monitor::LicenseMonitor;
pub use probe::{FileLicenseProbe, LicenseProbe};
pub use store::LicenseStore;

/// Product identifier this service is licensed under.
pub const DEFAULT_PRODUCT: &str = "liveness-face";

/// Expiry at or after 3000-01-01T00:00:00Z means "no limit".
pub const NO_LIMIT_EPOCH: i64 = 32_503_622_400;

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseStatus {
    pub product:    String,
    pub expires_at: DateTime<Utc>,
    pub issued_to:  Option<String>,
}

impl LicenseStatus {
    pub fn new(product: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { product: product.into(), expires_at, issued_to: None }
    }

    pub fn unlimited(product: impl Into<String>) -> Self {
        Self::new(product, no_limit_sentinel())
    }

    pub fn is_unlimited(&self) -> bool {
        self.expires_at.timestamp() >= NO_LIMIT_EPOCH
    }

    /// Present and not expired as of `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }

    pub fn is_valid(&self) -> bool { self.is_valid_at(Utc::now()) }
}

pub fn no_limit_sentinel() -> DateTime<Utc> {
    Utc.timestamp_opt(NO_LIMIT_EPOCH, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("license not installed ({0})")]
    NotInstalled(String),

    #[error("license unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("license malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("license is for product {found:?}, expected {expected:?}")]
    WrongProduct { expected: String, found: String },

    #[error("license signature missing")]
    Unsigned,

    #[error("license signature does not verify")]
    BadSignature,

    #[error("license expiry {0} is out of range")]
    BadExpiry(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn validity_is_present_and_not_expired() {
        let now = Utc::now();
        assert!(LicenseStatus::new("p", now + Duration::days(1)).is_valid_at(now));
        assert!(!LicenseStatus::new("p", now - Duration::seconds(1)).is_valid_at(now));
    }

    #[test]
    fn sentinel_marks_unlimited() {
        let status = LicenseStatus::unlimited(DEFAULT_PRODUCT);
        assert!(status.is_unlimited());
        assert_eq!(status.expires_at.timestamp(), NO_LIMIT_EPOCH);
        assert!(!LicenseStatus::new("p", Utc::now()).is_unlimited());
    }
}
