// livegate/src/status.rs
//
// Text bodies for GET /version and GET /status.

use crate::license::{LicenseStatus, LicenseStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build update identifier, stamped by build.rs.
pub const UPDATE: &str = env!("LIVEGATE_UPDATE");

pub const LICENSE_NOT_FOUND: &str = "License not found";

#[derive(Clone)]
pub struct StatusReporter {
    license: LicenseStore,
}

impl StatusReporter {
    pub fn new(license: LicenseStore) -> Self {
        Self { license }
    }

    pub fn version(&self) -> String {
        format!("Version : {}\nUpdate : {}", VERSION, UPDATE)
    }

    pub fn status(&self) -> String {
        describe(self.license.read().as_ref())
    }
}

/// Dates are rendered in UTC. An expired license is still reported with its
/// date; the gate is what refuses it.
pub fn describe(status: Option<&LicenseStatus>) -> String {
    match status {
        None => LICENSE_NOT_FOUND.to_string(),
        Some(s) if s.is_unlimited() => "License valid : NO LIMIT".to_string(),
        Some(s) => format!("License valid : {}", s.expires_at.format("%Y-%m-%d")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn absent_license() {
        assert_eq!(describe(None), "License not found");
    }

    #[test]
    fn far_future_expiry_is_no_limit() {
        let status = LicenseStatus::unlimited("liveness-face");
        assert_eq!(describe(Some(&status)), "License valid : NO LIMIT");

        let year_3500 = LicenseStatus::new("liveness-face", Utc.with_ymd_and_hms(3500, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(describe(Some(&year_3500)), "License valid : NO LIMIT");
    }

    #[test]
    fn concrete_expiry_is_a_date() {
        let status = LicenseStatus::new("liveness-face", Utc.with_ymd_and_hms(2027, 3, 9, 23, 59, 59).unwrap());
        assert_eq!(describe(Some(&status)), "License valid : 2027-03-09");
    }

    #[test]
    fn reporter_reads_the_store() {
        let store = LicenseStore::new();
        let reporter = StatusReporter::new(store.clone());
        assert_eq!(reporter.status(), "License not found");
        store.write(Some(LicenseStatus::unlimited("liveness-face")));
        assert_eq!(reporter.status(), "License valid : NO LIMIT");
    }

    #[test]
    fn version_has_two_lines() {
        let text = StatusReporter::new(LicenseStore::new()).version();
        assert!(text.starts_with(&format!("Version : {}\nUpdate : ", VERSION)));
    }
}
