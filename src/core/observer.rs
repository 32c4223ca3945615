// src/core/observer.rs

use tracing::info;

use crate::core::models::{ProbeStatus, ScanReport};

/// Receives every finished report. Implementations must be cheap; they run on
/// the scanning task before `scan` returns.
pub trait ScanObserver: Send + Sync {
    fn scan_finished(&self, report: &ScanReport);
}

/// Emits one structured log line per scan with timing and cache figures.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ScanObserver for TracingObserver {
    fn scan_finished(&self, report: &ScanReport) {
        let stats = report.stats();
        let failed = report
            .probe_results()
            .values()
            .filter(|r| matches!(r.status(), ProbeStatus::Failed | ProbeStatus::TimedOut))
            .count();
        let (hits, misses) = stats
            .cache
            .iter()
            .fold((0, 0), |(h, m), c| (h + c.hits, m + c.misses));
        info!(
            target = report.target(),
            status = %report.status(),
            score = report.overall_score(),
            grade = %report.grade(),
            duration_ms = stats.duration_ms,
            failed_probes = failed,
            recommendations = report.recommendations().len(),
            cache_hits = hits,
            cache_misses = misses,
            "Scan report ready."
        );
    }
}
