//! Metrics: a process-wide Prometheus registry exposed via
//! `GET /metrics` as text exposition.

use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub job_total: IntCounterVec,
    pub stage_latency_seconds: HistogramVec,
    pub worker_active_jobs: IntGauge,
    pub jobs_accepted_total: IntCounter,
    pub jobs_failed_total: IntCounter,
    pub queue_depth: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let job_total = IntCounterVec::new(
            prometheus::Opts::new("job_total", "Job terminal transitions by status"),
            &["status"],
        )
        .expect("static metric declaration is valid");

        let stage_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "stage_latency_seconds",
                "Stage execution latency in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["stage", "status"],
        )
        .expect("static metric declaration is valid");

        let worker_active_jobs =
            IntGauge::new("worker_active_jobs", "Jobs currently being processed")
                .expect("static metric declaration is valid");

        let jobs_accepted_total = IntCounter::new(
            "jobs_accepted_total",
            "Jobs accepted at the submission endpoint",
        )
        .expect("static metric declaration is valid");

        let jobs_failed_total =
            IntCounter::new("jobs_failed_total", "Jobs that reached a failed terminal state")
                .expect("static metric declaration is valid");

        let queue_depth = IntGauge::new("queue_depth", "Pending messages in the job queue")
            .expect("static metric declaration is valid");

        registry
            .register(Box::new(job_total.clone()))
            .expect("metric registration is infallible for unique names");
        registry
            .register(Box::new(stage_latency_seconds.clone()))
            .expect("metric registration is infallible for unique names");
        registry
            .register(Box::new(worker_active_jobs.clone()))
            .expect("metric registration is infallible for unique names");
        registry
            .register(Box::new(jobs_accepted_total.clone()))
            .expect("metric registration is infallible for unique names");
        registry
            .register(Box::new(jobs_failed_total.clone()))
            .expect("metric registration is infallible for unique names");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("metric registration is infallible for unique names");

        Self {
            registry,
            job_total,
            stage_latency_seconds,
            worker_active_jobs,
            jobs_accepted_total,
            jobs_failed_total,
            queue_depth,
        }
    }

    pub fn job_accepted(&self) {
        self.jobs_accepted_total.inc();
    }

    pub fn job_done(&self) {
        self.job_total.with_label_values(&["done"]).inc();
    }

    pub fn job_failed(&self) {
        self.job_total.with_label_values(&["failed"]).inc();
        self.jobs_failed_total.inc();
    }

    pub fn stage_observed(&self, stage: &str, status: &str, duration_secs: f64) {
        self.stage_latency_seconds
            .with_label_values(&[stage, status])
            .observe(duration_secs);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
