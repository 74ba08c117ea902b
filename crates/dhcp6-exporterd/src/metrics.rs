//! Prometheus metrics collection for the exporter

use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector for route synchronization
#[derive(Clone)]
pub struct MetricsCollector {
    // Counters
    pub routes_applied_total: IntCounter,
    pub routes_removed_total: IntCounter,
    pub route_failures_total: IntCounter,
    pub benign_noop_total: IntCounter,
    pub heartbeat_failures_total: IntCounter,
    pub reconnections_total: IntCounter,
    pub reconcile_skipped_total: IntCounter,
    pub duplicate_na_leases_total: IntCounter,

    // Gauges
    pub switch_connected: Gauge,

    // Histograms
    pub route_latency_seconds: Histogram,

    // Registry for export
    pub registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let routes_applied_total = counter(
            &registry,
            "dhcp6_exporter_routes_applied_total",
            "Total number of routes applied on the switch",
        )?;
        let routes_removed_total = counter(
            &registry,
            "dhcp6_exporter_routes_removed_total",
            "Total number of routes removed from the switch",
        )?;
        let route_failures_total = counter(
            &registry,
            "dhcp6_exporter_route_failures_total",
            "Total number of abandoned route operations",
        )?;
        let benign_noop_total = counter(
            &registry,
            "dhcp6_exporter_benign_noop_total",
            "Route commands answered with HTTP 500 and treated as no-ops",
        )?;
        let heartbeat_failures_total = counter(
            &registry,
            "dhcp6_exporter_heartbeat_failures_total",
            "Total number of failed heartbeat ticks",
        )?;
        let reconnections_total = counter(
            &registry,
            "dhcp6_exporter_reconnections_total",
            "Switch restarts or reconnections that triggered a resync",
        )?;
        let reconcile_skipped_total = counter(
            &registry,
            "dhcp6_exporter_reconcile_skipped_total",
            "Leases skipped during resync for lack of mapping or sibling lease",
        )?;
        let duplicate_na_leases_total = counter(
            &registry,
            "dhcp6_exporter_duplicate_na_leases_total",
            "Lookups that found more than one active IA_NA lease for a DUID and IAID",
        )?;

        let switch_connected = Gauge::with_opts(Opts::new(
            "dhcp6_exporter_switch_connected",
            "Switch connection status (1=connected, 0=disconnected)",
        ))?;
        registry.register(Box::new(switch_connected.clone()))?;

        let route_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "dhcp6_exporter_route_latency_seconds",
                "Route operation latency in seconds, lookups included",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(route_latency_seconds.clone()))?;

        Ok(Self {
            routes_applied_total,
            routes_removed_total,
            route_failures_total,
            benign_noop_total,
            heartbeat_failures_total,
            reconnections_total,
            reconcile_skipped_total,
            duplicate_na_leases_total,
            switch_connected,
            route_latency_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Record a completed route operation
    pub fn record_route(&self, is_apply: bool) {
        if is_apply {
            self.routes_applied_total.inc();
        } else {
            self.routes_removed_total.inc();
        }
    }

    pub fn record_route_failure(&self) {
        self.route_failures_total.inc();
    }

    pub fn record_benign_noop(&self) {
        self.benign_noop_total.inc();
    }

    /// Record a failed heartbeat tick
    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures_total.inc();
        self.switch_connected.set(0.0);
    }

    /// Record a detected restart or reconnection
    pub fn record_reconnection(&self) {
        self.reconnections_total.inc();
        self.switch_connected.set(1.0);
    }

    pub fn record_reconcile_skipped(&self, count: usize) {
        self.reconcile_skipped_total.inc_by(count as u64);
    }

    pub fn record_duplicate_na_lease(&self) {
        self.duplicate_na_leases_total.inc();
    }

    pub fn observe_route_latency(&self, duration_secs: f64) {
        self.route_latency_seconds.observe(duration_secs);
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
