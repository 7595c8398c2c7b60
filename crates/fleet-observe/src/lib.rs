//! Structured observability for the fleet core.
//!
//! Atomic counters behind a named struct with Prometheus text export,
//! covering this system's operations: sync dispatch, reconciliation,
//! campaign execution, and the audit best-effort queue.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic operation counters for the fleet core. All counters are
/// thread-safe and meant to be shared via `Arc`.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    /// Total sync attempts dispatched by the scheduler (scheduled + manual).
    pub sync_total: Counter,
    /// Total syncs that closed with `status=failed`.
    pub sync_failed: Counter,
    /// Total assets newly created across all reconciliations.
    pub reconcile_assets_created: Counter,
    /// Total assets updated across all reconciliations.
    pub reconcile_assets_updated: Counter,
    /// Total assets soft-deleted across all reconciliations.
    pub reconcile_assets_removed: Counter,
    /// Total campaign phases that reached `completed`.
    pub campaign_phase_completed: Counter,
    /// Total campaign phases that reached `failed`.
    pub campaign_phase_failed: Counter,
    /// Total rollbacks executed (any scope).
    pub campaign_rollback_total: Counter,
    /// Total audit entries appended via the synchronous path.
    pub audit_append_total: Counter,
    /// Total entries dropped from the best-effort audit queue on overflow.
    pub audit_queue_dropped_total: Counter,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Renders a [`FleetMetrics`] as Prometheus text format.
pub struct MetricsExporter<'a> {
    metrics: &'a FleetMetrics,
    prefix: String,
}

impl<'a> MetricsExporter<'a> {
    pub fn new(metrics: &'a FleetMetrics) -> Self {
        Self { metrics, prefix: "fleetcore".to_string() }
    }

    pub fn with_prefix(metrics: &'a FleetMetrics, prefix: impl Into<String>) -> Self {
        Self { metrics, prefix: prefix.into() }
    }

    pub fn render(&self) -> String {
        let m = self.metrics;
        let mut out = String::new();
        self.write_counter(&mut out, "sync_total", "Total connector sync attempts dispatched", m.sync_total.get());
        self.write_counter(&mut out, "sync_failed", "Total connector syncs that ended failed", m.sync_failed.get());
        self.write_counter(&mut out, "reconcile_assets_created", "Total assets newly discovered across all syncs", m.reconcile_assets_created.get());
        self.write_counter(&mut out, "reconcile_assets_updated", "Total assets updated across all syncs", m.reconcile_assets_updated.get());
        self.write_counter(&mut out, "reconcile_assets_removed", "Total assets soft-deleted across all syncs", m.reconcile_assets_removed.get());
        self.write_counter(&mut out, "campaign_phase_completed", "Total campaign phases that completed", m.campaign_phase_completed.get());
        self.write_counter(&mut out, "campaign_phase_failed", "Total campaign phases that failed", m.campaign_phase_failed.get());
        self.write_counter(&mut out, "campaign_rollback_total", "Total rollbacks executed", m.campaign_rollback_total.get());
        self.write_counter(&mut out, "audit_append_total", "Total audit entries appended synchronously", m.audit_append_total.get());
        self.write_counter(&mut out, "audit_queue_dropped_total", "Total best-effort audit entries dropped on overflow", m.audit_queue_dropped_total.get());
        out
    }

    fn write_counter(&self, out: &mut String, name: &str, help: &str, value: u64) {
        let p = &self.prefix;
        out.push_str(&format!("# HELP {p}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {p}_{name} counter\n"));
        out.push_str(&format!("{p}_{name} {value}\n\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = FleetMetrics::new();
        assert_eq!(metrics.sync_total.get(), 0);
        metrics.sync_total.inc();
        metrics.sync_total.inc();
        assert_eq!(metrics.sync_total.get(), 2);
    }

    #[test]
    fn exporter_renders_all_counters() {
        let metrics = FleetMetrics::new();
        metrics.campaign_rollback_total.add(3);
        let text = MetricsExporter::new(&metrics).render();
        assert!(text.contains("fleetcore_campaign_rollback_total 3"));
        assert!(text.contains("# TYPE fleetcore_sync_total counter"));
    }

    #[test]
    fn exporter_honors_custom_prefix() {
        let metrics = FleetMetrics::new();
        let text = MetricsExporter::with_prefix(&metrics, "custom").render();
        assert!(text.contains("custom_sync_total"));
    }
}
