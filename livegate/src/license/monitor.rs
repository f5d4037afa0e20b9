// livegate/src/license/monitor.rs
//
// Background license refresh.
//
// Loop: sleep the polling interval, probe, replace the store. A failed probe
// clears the store so requests fail fast instead of calling the engine; a
// successful probe overwrites it. Probe errors are never escalated and never
// retried faster than the interval.
//
// The loop ends only when the shutdown token is cancelled. `refresh()` is
// also called once synchronously at startup so the first request after boot
// sees a real status.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LicenseError, LicenseProbe, LicenseStatus, LicenseStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Outcome of one probe: the status that was published, or why the store was
/// cleared.
pub type LicenseCheckResult = Result<LicenseStatus, LicenseError>;

pub struct LicenseMonitor {
    probe:    Arc<dyn LicenseProbe>,
    store:    LicenseStore,
    interval: Duration,
}

impl LicenseMonitor {
    pub fn new(probe: Arc<dyn LicenseProbe>, store: LicenseStore) -> Self {
        Self { probe, store, interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn store(&self) -> &LicenseStore { &self.store }

    /// Probe once and publish the result. Blocking; runs the probe inline.
    /// Returns true when a license was published.
    pub fn refresh(&self) -> bool {
        let check = self.probe.probe();
        self.publish(check)
    }

    async fn refresh_async(&self) {
        let probe = Arc::clone(&self.probe);
        let check = match tokio::task::spawn_blocking(move || probe.probe()).await {
            Ok(check) => check,
            Err(e) => {
                warn!(error = %e, "license probe task failed");
                Err(LicenseError::NotInstalled("probe task failed".into()))
            }
        };
        self.publish(check);
    }

    fn publish(&self, check: LicenseCheckResult) -> bool {
        match check {
            Ok(status) => {
                let previous = self.store.write(Some(status.clone()));
                match previous {
                    None => info!(
                        product = %status.product,
                        expires = %status.expires_at,
                        unlimited = status.is_unlimited(),
                        "license installed"
                    ),
                    Some(ref old) if old.expires_at != status.expires_at => info!(
                        expires = %status.expires_at,
                        previous = %old.expires_at,
                        "license renewed"
                    ),
                    Some(_) => debug!("license unchanged"),
                }
                if !status.is_valid() {
                    debug!(expires = %status.expires_at, "installed license is expired");
                }
                true
            }
            Err(e) => {
                match self.store.write(None) {
                    Some(_) => warn!(error = %e, "license lost; requests will be refused"),
                    None    => debug!(error = %e, "license still missing"),
                }
                false
            }
        }
    }

    /// Refresh every interval until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs_f64(), "license monitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.refresh_async().await;
        }
        info!("license monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Probe that returns whatever the test last put in `next`.
    struct SwitchProbe {
        next:  Mutex<Option<LicenseStatus>>,
        calls: AtomicU64,
    }

    impl SwitchProbe {
        fn new(initial: Option<LicenseStatus>) -> Arc<Self> {
            Arc::new(Self { next: Mutex::new(initial), calls: AtomicU64::new(0) })
        }
        fn set(&self, status: Option<LicenseStatus>) { *self.next.lock() = status; }
    }

    impl LicenseProbe for SwitchProbe {
        fn probe(&self) -> LicenseCheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.next.lock().clone().ok_or_else(|| LicenseError::NotInstalled("test".into()))
        }
    }

    fn valid() -> LicenseStatus {
        LicenseStatus::new("liveness-face", Utc::now() + ChronoDuration::days(30))
    }

    #[test]
    fn startup_refresh_populates_store() {
        let probe = SwitchProbe::new(Some(valid()));
        let monitor = LicenseMonitor::new(probe.clone(), LicenseStore::new());
        assert!(monitor.refresh());
        assert!(monitor.store().is_licensed());
    }

    #[test]
    fn failed_probe_clears_store() {
        let probe = SwitchProbe::new(Some(valid()));
        let monitor = LicenseMonitor::new(probe.clone(), LicenseStore::new());
        monitor.refresh();
        probe.set(None);
        assert!(!monitor.refresh());
        assert!(monitor.store().read().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn revocation_is_observed_within_one_interval() {
        let probe = SwitchProbe::new(Some(valid()));
        let store = LicenseStore::new();
        let monitor = Arc::new(
            LicenseMonitor::new(probe.clone(), store.clone())
                .with_interval(DEFAULT_POLL_INTERVAL),
        );
        monitor.refresh();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&monitor).run(shutdown.clone()));

        let mut rx = store.subscribe();
        probe.set(None);
        let revoked_at = tokio::time::Instant::now();

        // Not immediately...
        assert!(store.is_licensed());
        // ...but by the next poll.
        rx.changed().await.unwrap();
        assert!(!store.is_licensed());
        assert!(revoked_at.elapsed() <= DEFAULT_POLL_INTERVAL);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_without_probing() {
        let probe = SwitchProbe::new(Some(valid()));
        let monitor = Arc::new(LicenseMonitor::new(probe.clone(), LicenseStore::new()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&monitor).run(shutdown.clone()));

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }
}
