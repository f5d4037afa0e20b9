// livegate/src/metrics.rs
//
// Service counters, rendered in Prometheus text exposition format at
// GET /metrics.
//
// Metrics exposed:
//
//   livegate_requests_total                 Counter   POST /process requests
//   livegate_unlicensed_total               Counter   requests refused by the license gate
//   livegate_engine_invocations_total       Counter   liveness calls into the engine
//   livegate_license_retries_total          Counter   retries after a license-not-installed error
//   livegate_engine_errors_total            Counter   final results with a non-OK engine state
//   livegate_conflicts_total                Counter   requests answered with 409
//   livegate_verdicts_total{verdict}        Counter   verdicts by class
//   livegate_probability_bucket{bucket}     Counter   per-bucket liveness probability counts
//   livegate_engine_generation              Gauge     current engine generation
//   livegate_engine_recreations_total       Counter   engine rebuilds
//   livegate_license_valid                  Gauge     1 when the gate is open
//   livegate_license_refreshes_total        Counter   license store writes by the monitor

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::pipeline::verdict::{LivenessReport, Verdict};

pub struct ServiceMetrics {
    pub requests:           AtomicU64,
    pub unlicensed:         AtomicU64,
    pub engine_invocations: AtomicU64,
    pub license_retries:    AtomicU64,
    pub engine_errors:      AtomicU64,
    pub conflicts:          AtomicU64,
    verdict_bad_quality:    AtomicU64,
    verdict_genuine:        AtomicU64,
    verdict_spoofed:        AtomicU64,
    /// Liveness probability buckets [0.0, 0.1), [0.1, 0.2), ... [0.9, 1.0]
    probability_buckets:    [AtomicU64; 10],
}

/// Point-in-time values owned by other components.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub engine_generation:   u64,
    pub engine_recreations:  u64,
    pub license_valid:       bool,
    pub license_refreshes:   u64,
}

impl ServiceMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests:            AtomicU64::new(0),
            unlicensed:          AtomicU64::new(0),
            engine_invocations:  AtomicU64::new(0),
            license_retries:     AtomicU64::new(0),
            engine_errors:       AtomicU64::new(0),
            conflicts:           AtomicU64::new(0),
            verdict_bad_quality: AtomicU64::new(0),
            verdict_genuine:     AtomicU64::new(0),
            verdict_spoofed:     AtomicU64::new(0),
            probability_buckets: Default::default(),
        })
    }

    pub fn record_request(&self) { self.requests.fetch_add(1, Ordering::Relaxed); }
    pub fn record_unlicensed(&self) { self.unlicensed.fetch_add(1, Ordering::Relaxed); }
    pub fn record_invocation(&self) { self.engine_invocations.fetch_add(1, Ordering::Relaxed); }
    pub fn record_license_retry(&self) { self.license_retries.fetch_add(1, Ordering::Relaxed); }
    pub fn record_conflict(&self) { self.conflicts.fetch_add(1, Ordering::Relaxed); }

    pub fn record_report(&self, report: &LivenessReport) {
        if !report.is_ok() {
            self.engine_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match report.verdict {
            Verdict::BadQuality => self.verdict_bad_quality.fetch_add(1, Ordering::Relaxed),
            Verdict::Genuine    => self.verdict_genuine.fetch_add(1, Ordering::Relaxed),
            Verdict::Spoofed    => self.verdict_spoofed.fetch_add(1, Ordering::Relaxed),
        };
        let bucket = ((report.probability.clamp(0.0, 1.0) / 0.1) as usize).min(9);
        self.probability_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn prometheus_text(&self, gauges: Gauges) -> String {
        let mut out = String::with_capacity(2048);

        macro_rules! counter {
            ($name:expr, $help:expr, $val:expr) => {
                let _ = write!(out, "# HELP {0} {1}\n# TYPE {0} counter\n{0} {2}\n", $name, $help, $val);
            };
        }
        macro_rules! gauge {
            ($name:expr, $help:expr, $val:expr) => {
                let _ = write!(out, "# HELP {0} {1}\n# TYPE {0} gauge\n{0} {2}\n", $name, $help, $val);
            };
        }

        counter!("livegate_requests_total", "Liveness requests received",
                 self.requests.load(Ordering::Relaxed));
        counter!("livegate_unlicensed_total", "Requests refused by the license gate",
                 self.unlicensed.load(Ordering::Relaxed));
        counter!("livegate_engine_invocations_total", "Liveness calls into the engine",
                 self.engine_invocations.load(Ordering::Relaxed));
        counter!("livegate_license_retries_total", "Retries after a license-not-installed engine error",
                 self.license_retries.load(Ordering::Relaxed));
        counter!("livegate_engine_errors_total", "Requests whose final engine state was not OK",
                 self.engine_errors.load(Ordering::Relaxed));
        counter!("livegate_conflicts_total", "Requests answered with HTTP 409",
                 self.conflicts.load(Ordering::Relaxed));

        out.push_str("# HELP livegate_verdicts_total Verdicts by class\n");
        out.push_str("# TYPE livegate_verdicts_total counter\n");
        for (label, counter) in [
            (Verdict::BadQuality, &self.verdict_bad_quality),
            (Verdict::Genuine,    &self.verdict_genuine),
            (Verdict::Spoofed,    &self.verdict_spoofed),
        ] {
            let _ = writeln!(out, "livegate_verdicts_total{{verdict=\"{}\"}} {}",
                             label, counter.load(Ordering::Relaxed));
        }

        // Not a Prometheus histogram: each bucket counts only its own
        // 0.1-wide range, labelled by its upper bound.
        out.push_str("# HELP livegate_probability_bucket Liveness probability counts per 0.1-wide bucket\n");
        out.push_str("# TYPE livegate_probability_bucket counter\n");
        for (i, bucket) in self.probability_buckets.iter().enumerate() {
            let _ = writeln!(out, "livegate_probability_bucket{{bucket=\"{:.1}\"}} {}",
                             (i + 1) as f64 * 0.1, bucket.load(Ordering::Relaxed));
        }

        gauge!("livegate_engine_generation", "Current engine pipeline generation",
               gauges.engine_generation);
        counter!("livegate_engine_recreations_total", "Engine pipeline rebuilds",
                 gauges.engine_recreations);
        gauge!("livegate_license_valid", "1 when a valid license is installed",
               u8::from(gauges.license_valid));
        counter!("livegate_license_refreshes_total", "License store writes",
                 gauges.license_refreshes);

        out
    }
}
