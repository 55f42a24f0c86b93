// SPDX-License-Identifier: AGPL-3.0-only
//! Prometheus metrics for the access broker.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;
use warden_auth::StatusReport;

/// Global metrics registry singleton.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    registry: Registry,

    // Authentication metrics
    pub auth_requests_total: CounterVec,
    pub auth_duration_seconds: HistogramVec,

    // Backend health: 1 online, 2 degraded, 0 offline, -1 error
    pub backend_status: GaugeVec,

    // Relay metrics
    pub relay_sessions_active: Gauge,
    pub relay_sessions_total: CounterVec,
    pub relay_commands_total: IntCounter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let auth_requests_total = CounterVec::new(
            Opts::new(
                "warden_auth_requests_total",
                "Authentication requests by backend and result",
            ),
            &["backend", "result"],
        )
        .expect("metric can be created");

        let auth_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "warden_auth_duration_seconds",
                "Authentication request duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["backend"],
        )
        .expect("metric can be created");

        let backend_status = GaugeVec::new(
            Opts::new("warden_backend_status", "Last probed backend status"),
            &["backend"],
        )
        .expect("metric can be created");

        let relay_sessions_active = Gauge::with_opts(Opts::new(
            "warden_relay_sessions_active",
            "Number of live terminal relay sessions",
        ))
        .expect("metric can be created");

        let relay_sessions_total = CounterVec::new(
            Opts::new(
                "warden_relay_sessions_total",
                "Terminal relay sessions by final outcome",
            ),
            &["outcome"],
        )
        .expect("metric can be created");

        let relay_commands_total = IntCounter::new(
            "warden_relay_commands_total",
            "Commands detected in relayed sessions",
        )
        .expect("metric can be created");

        registry
            .register(Box::new(auth_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(auth_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(backend_status.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(relay_sessions_active.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(relay_sessions_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(relay_commands_total.clone()))
            .expect("metric can be registered");

        Self {
            registry,
            auth_requests_total,
            auth_duration_seconds,
            backend_status,
            relay_sessions_active,
            relay_sessions_total,
            relay_commands_total,
        }
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn record_status(&self, report: &StatusReport) {
        for (backend, status) in [
            ("directory", &report.directory),
            ("tacacs", &report.tacacs),
            ("radius", &report.radius),
        ] {
            self.backend_status
                .with_label_values(&[backend])
                .set(status.status.as_gauge() as f64);
        }
    }
}

/// Records one authentication's duration and result.
pub struct AuthTimer {
    backend: &'static str,
    start: std::time::Instant,
}

impl AuthTimer {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            start: std::time::Instant::now(),
        }
    }

    pub fn finish(self, result: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        metrics()
            .auth_duration_seconds
            .with_label_values(&[self.backend])
            .observe(duration);
        metrics()
            .auth_requests_total
            .with_label_values(&[self.backend, result])
            .inc();
    }
}
