//! Process-wide counters exposed on `/metrics` in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Upper bounds (ms) of the analyze latency histogram.  Model round trips
/// take seconds, so the buckets are coarse.
pub const LATENCY_BUCKETS_MS: [u64; 10] = [100, 250, 500, 1000, 2500, 5000, 10000, 30000, 60000, 120000];

pub struct Metrics {
    pub analyze_requests_total: AtomicU64,
    pub analyze_success_total: AtomicU64,
    pub auth_failures_total: AtomicU64,
    pub validation_rejections_total: AtomicU64,
    pub provider_failures_total: AtomicU64,
    pub history_requests_total: AtomicU64,
    pub history_read_failures_total: AtomicU64,
    pub history_write_failures_total: AtomicU64,
    latency_counts: Vec<AtomicU64>,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    process_start_epoch: f64,
    process_start_instant: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        let start = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            analyze_requests_total: AtomicU64::new(0),
            analyze_success_total: AtomicU64::new(0),
            auth_failures_total: AtomicU64::new(0),
            validation_rejections_total: AtomicU64::new(0),
            provider_failures_total: AtomicU64::new(0),
            history_requests_total: AtomicU64::new(0),
            history_read_failures_total: AtomicU64::new(0),
            history_write_failures_total: AtomicU64::new(0),
            latency_counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            process_start_epoch: start.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }
}

pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    pub fn observe_analyze_latency(&self, ms: u64) {
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        // first bucket >= value; larger values only land in +Inf
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| ms <= *ub) {
            self.latency_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Render the exposition.  Event-log counters are passed in since the
    /// log owns them.
    pub fn render(&self, event_lines: u64, event_write_errors: u64, event_log_bytes: u64) -> String {
        let mut buf = String::new();
        let counters: [(&str, &str, u64); 8] = [
            ("analyze_requests_total", "Analyze requests received", load(&self.analyze_requests_total)),
            ("analyze_success_total", "Analyses returned to the caller", load(&self.analyze_success_total)),
            ("auth_failures_total", "Requests without a usable identity", load(&self.auth_failures_total)),
            ("validation_rejections_total", "Analyze requests rejected before the provider call", load(&self.validation_rejections_total)),
            ("provider_failures_total", "Provider calls that failed or broke the schema", load(&self.provider_failures_total)),
            ("history_requests_total", "History list requests received", load(&self.history_requests_total)),
            ("history_read_failures_total", "History list calls that failed", load(&self.history_read_failures_total)),
            ("history_write_failures_total", "Background history writes that failed", load(&self.history_write_failures_total)),
        ];
        for (name, help, value) in counters {
            writeln!(&mut buf, "# HELP contract_audit_{name} {help}").ok();
            writeln!(&mut buf, "# TYPE contract_audit_{name} counter").ok();
            writeln!(&mut buf, "contract_audit_{name} {value}").ok();
        }

        writeln!(&mut buf, "# HELP contract_audit_event_lines_total Event log lines written").ok();
        writeln!(&mut buf, "# TYPE contract_audit_event_lines_total counter").ok();
        writeln!(&mut buf, "contract_audit_event_lines_total {}", event_lines).ok();
        writeln!(&mut buf, "# HELP contract_audit_event_write_errors_total Event log write failures").ok();
        writeln!(&mut buf, "# TYPE contract_audit_event_write_errors_total counter").ok();
        writeln!(&mut buf, "contract_audit_event_write_errors_total {}", event_write_errors).ok();

        writeln!(&mut buf, "# HELP contract_audit_analyze_latency_ms Analyze request latency histogram milliseconds").ok();
        writeln!(&mut buf, "# TYPE contract_audit_analyze_latency_ms histogram").ok();
        let mut cumulative: u64 = 0;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += load(&self.latency_counts[i]);
            writeln!(&mut buf, "contract_audit_analyze_latency_ms_bucket{{le=\"{}\"}} {}", ub, cumulative).ok();
        }
        let count = load(&self.latency_count);
        writeln!(&mut buf, "contract_audit_analyze_latency_ms_bucket{{le=\"+Inf\"}} {}", count).ok();
        writeln!(&mut buf, "contract_audit_analyze_latency_ms_sum {}", load(&self.latency_sum_ms)).ok();
        writeln!(&mut buf, "contract_audit_analyze_latency_ms_count {}", count).ok();

        writeln!(
            &mut buf,
            "# HELP contract_audit_build_info Build information\n# TYPE contract_audit_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "contract_audit_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP contract_audit_event_log_size_bytes Size of the active event log file (0 if disabled)\n# TYPE contract_audit_event_log_size_bytes gauge"
        )
        .ok();
        writeln!(&mut buf, "contract_audit_event_log_size_bytes {}", event_log_bytes).ok();
        writeln!(
            &mut buf,
            "# HELP contract_audit_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE contract_audit_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(&mut buf, "contract_audit_process_start_time_seconds {}", self.process_start_epoch).ok();
        writeln!(
            &mut buf,
            "# HELP contract_audit_process_uptime_seconds Process uptime seconds\n# TYPE contract_audit_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "contract_audit_process_uptime_seconds {}",
            self.process_start_instant.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
