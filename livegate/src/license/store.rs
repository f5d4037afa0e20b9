// livegate/src/license/store.rs
//
// Single-slot license register.
//
// Backed by a tokio watch channel: the monitor swaps in a whole new status
// under the channel lock, readers take a consistent clone via `borrow()`, and
// anything that wants to wait for the next refresh can `subscribe()`.
// Readers never see a half-written record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::LicenseStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseSnapshot {
    /// Bumped on every write, including writes that clear the slot.
    pub version: u64,
    pub status:  Option<LicenseStatus>,
}

#[derive(Clone)]
pub struct LicenseStore {
    tx: Arc<watch::Sender<LicenseSnapshot>>,
}

impl LicenseStore {
    /// Empty store: "no license installed" until the first write.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LicenseSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn read(&self) -> Option<LicenseStatus> {
        self.tx.borrow().status.clone()
    }

    pub fn snapshot(&self) -> LicenseSnapshot {
        self.tx.borrow().clone()
    }

    /// Replace the slot; `None` clears it. Returns the previous status.
    pub fn write(&self, status: Option<LicenseStatus>) -> Option<LicenseStatus> {
        let mut previous = None;
        self.tx.send_modify(|slot| {
            slot.version += 1;
            previous = std::mem::replace(&mut slot.status, status);
        });
        previous
    }

    pub fn version(&self) -> u64 { self.tx.borrow().version }

    /// True when a license is present and unexpired as of `now`.
    pub fn is_licensed_at(&self, now: DateTime<Utc>) -> bool {
        self.tx.borrow().status.as_ref().map(|s| s.is_valid_at(now)).unwrap_or(false)
    }

    pub fn is_licensed(&self) -> bool { self.is_licensed_at(Utc::now()) }

    pub fn subscribe(&self) -> watch::Receiver<LicenseSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for LicenseStore { fn default() -> Self { Self::new() } }

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn starts_empty() {
        let store = LicenseStore::new();
        assert!(store.read().is_none());
        assert!(!store.is_licensed());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn write_replaces_and_clear_empties() {
        let store = LicenseStore::new();
        let status = LicenseStatus::new("liveness-face", Utc::now() + Duration::days(30));

        assert!(store.write(Some(status.clone())).is_none());
        assert_eq!(store.read(), Some(status.clone()));
        assert!(store.is_licensed());

        assert_eq!(store.write(None), Some(status));
        assert!(store.read().is_none());
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn expired_status_does_not_license() {
        let store = LicenseStore::new();
        store.write(Some(LicenseStatus::new("p", Utc::now() - Duration::hours(1))));
        assert!(store.read().is_some());
        assert!(!store.is_licensed());
    }

    #[tokio::test]
    async fn subscribers_see_every_write() {
        let store = LicenseStore::new();
        let mut rx = store.subscribe();
        store.write(Some(LicenseStatus::unlimited("p")));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version, 1);
        assert!(rx.borrow().status.is_some());
    }
}
