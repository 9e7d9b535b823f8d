//! Prometheus metrics for the diagnostic pipeline
//!
//! The recorder is an injected capability rather than process-global
//! state: the access client and the pipeline each receive a clone at
//! construction, and tests build a fresh instance to capture exactly what
//! one run emitted. Clones share the underlying registry.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::time::{Duration, Instant};

/// Metrics recorder shared by the access client, the agents and the
/// pipeline.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: Registry,
    started: Instant,

    runs: IntCounter,
    errors: IntCounter,
    vms_monitored: IntGauge,
    uptime_seconds: Gauge,

    issues_detected: IntCounterVec,
    resolutions_succeeded: IntCounterVec,
    resolutions_failed: IntCounterVec,
    escalations: IntCounterVec,
    resolution_duration: HistogramVec,

    backend_calls: IntCounterVec,
    backend_tokens: IntCounterVec,
    backend_latency: HistogramVec,

    provider_calls: HistogramVec,

    analysis_duration: Histogram,
    remediation_duration: Histogram,
    verification_duration: Histogram,
}

impl AgentMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs = IntCounter::new("azdiag_runs_total", "Total diagnostic pipeline runs")?;
        registry.register(Box::new(runs.clone()))?;

        let errors = IntCounter::new("azdiag_errors_total", "Total pipeline errors")?;
        registry.register(Box::new(errors.clone()))?;

        let vms_monitored = IntGauge::new(
            "azdiag_vms_monitored",
            "Number of VMs seen by the last inventory fetch",
        )?;
        registry.register(Box::new(vms_monitored.clone()))?;

        let uptime_seconds = Gauge::new("azdiag_uptime_seconds", "Agent uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let issues_detected = IntCounterVec::new(
            Opts::new(
                "azdiag_issues_detected_total",
                "Connectivity issues detected",
            ),
            &["cause", "resource", "resource_group"],
        )?;
        registry.register(Box::new(issues_detected.clone()))?;

        let resolutions_succeeded = IntCounterVec::new(
            Opts::new(
                "azdiag_resolutions_succeeded_total",
                "Automatic resolutions that succeeded",
            ),
            &["fix_type", "resource"],
        )?;
        registry.register(Box::new(resolutions_succeeded.clone()))?;

        let resolutions_failed = IntCounterVec::new(
            Opts::new(
                "azdiag_resolutions_failed_total",
                "Automatic resolutions that failed",
            ),
            &["fix_type", "reason"],
        )?;
        registry.register(Box::new(resolutions_failed.clone()))?;

        let escalations = IntCounterVec::new(
            Opts::new(
                "azdiag_escalations_total",
                "Incidents handed over to a human",
            ),
            &["reason", "resource"],
        )?;
        registry.register(Box::new(escalations.clone()))?;

        let resolution_duration = HistogramVec::new(
            HistogramOpts::new(
                "azdiag_resolution_duration_seconds",
                "Time from detection to applied fix",
            )
            .buckets(vec![5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["fix_type"],
        )?;
        registry.register(Box::new(resolution_duration.clone()))?;

        let backend_calls = IntCounterVec::new(
            Opts::new("azdiag_backend_calls_total", "Reasoning backend API calls"),
            &["model", "purpose"],
        )?;
        registry.register(Box::new(backend_calls.clone()))?;

        let backend_tokens = IntCounterVec::new(
            Opts::new(
                "azdiag_backend_tokens_total",
                "Reasoning backend tokens consumed",
            ),
            &["model"],
        )?;
        registry.register(Box::new(backend_tokens.clone()))?;

        let backend_latency = HistogramVec::new(
            HistogramOpts::new(
                "azdiag_backend_latency_seconds",
                "Reasoning backend call latency",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["model"],
        )?;
        registry.register(Box::new(backend_latency.clone()))?;

        let provider_calls = HistogramVec::new(
            HistogramOpts::new(
                "azdiag_provider_call_duration_seconds",
                "Management API call latency",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(provider_calls.clone()))?;

        let analysis_duration = Histogram::with_opts(
            HistogramOpts::new(
                "azdiag_analysis_duration_seconds",
                "Diagnostic analysis duration",
            )
            .buckets(vec![1.0, 3.0, 5.0, 10.0, 15.0, 30.0]),
        )?;
        registry.register(Box::new(analysis_duration.clone()))?;

        let remediation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "azdiag_remediation_duration_seconds",
                "Remediation step generation duration",
            )
            .buckets(vec![5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(remediation_duration.clone()))?;

        let verification_duration = Histogram::with_opts(
            HistogramOpts::new(
                "azdiag_verification_duration_seconds",
                "Post-fix verification duration",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0]),
        )?;
        registry.register(Box::new(verification_duration.clone()))?;

        Ok(Self {
            registry,
            started: Instant::now(),
            runs,
            errors,
            vms_monitored,
            uptime_seconds,
            issues_detected,
            resolutions_succeeded,
            resolutions_failed,
            escalations,
            resolution_duration,
            backend_calls,
            backend_tokens,
            backend_latency,
            provider_calls,
            analysis_duration,
            remediation_duration,
            verification_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_run(&self) {
        self.runs.inc();
        self.tick_uptime();
    }

    pub fn record_error(&self) {
        self.errors.inc();
    }

    pub fn set_vms_monitored(&self, count: usize) {
        self.vms_monitored.set(count as i64);
    }

    /// Refresh the uptime gauge. Called on run boundaries and on scrape.
    pub fn tick_uptime(&self) {
        self.uptime_seconds.set(self.started.elapsed().as_secs_f64());
    }

    pub fn record_issue_detected(&self, cause: &str, resource: &str, resource_group: &str) {
        tracing::info!(cause, resource, "Issue detected");
        self.issues_detected
            .with_label_values(&[cause, resource, resource_group])
            .inc();
    }

    pub fn record_resolution_success(&self, fix_type: &str, resource: &str, duration: Duration) {
        tracing::info!(fix_type, resource, "Resolution succeeded");
        self.resolutions_succeeded
            .with_label_values(&[fix_type, resource])
            .inc();
        self.resolution_duration
            .with_label_values(&[fix_type])
            .observe(duration.as_secs_f64());
    }

    pub fn record_resolution_failure(&self, fix_type: &str, reason: &str) {
        tracing::warn!(fix_type, reason, "Resolution failed");
        self.resolutions_failed
            .with_label_values(&[fix_type, reason])
            .inc();
    }

    pub fn record_escalation(&self, reason: &str, resource: &str) {
        tracing::warn!(reason, resource, "Escalating to a human");
        self.escalations.with_label_values(&[reason, resource]).inc();
    }

    pub fn record_backend_call(&self, model: &str, purpose: &str, tokens: u64, latency: Duration) {
        self.backend_calls.with_label_values(&[model, purpose]).inc();
        self.backend_tokens
            .with_label_values(&[model])
            .inc_by(tokens);
        self.backend_latency
            .with_label_values(&[model])
            .observe(latency.as_secs_f64());
    }

    pub fn record_provider_call(&self, operation: &str, outcome: &str, duration: Duration) {
        self.provider_calls
            .with_label_values(&[operation, outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_analysis(&self, duration: Duration) {
        self.analysis_duration.observe(duration.as_secs_f64());
    }

    pub fn observe_remediation(&self, duration: Duration) {
        self.remediation_duration.observe(duration.as_secs_f64());
    }

    pub fn observe_verification(&self, duration: Duration) {
        self.verification_duration.observe(duration.as_secs_f64());
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.tick_uptime();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

async fn metrics_handler(State(metrics): State<AgentMetrics>) -> String {
    metrics.render()
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Serve `/metrics` and `/health` until the surrounding task is dropped.
pub async fn serve(metrics: AgentMetrics, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?;
    tracing::info!("Metrics server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Metrics server failed")?;
    Ok(())
}
