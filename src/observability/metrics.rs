use std::time::Duration;

use anyhow::Result;
use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::info;

use crate::analyzer::Assessment;
use crate::config::MetricsConfig;
use crate::error::{Result as ShadowdResult, ShadowdError};
use crate::protocol::Status;

/// Metrics collector for connections, requests and verdicts
pub struct MetricsCollector {
    enabled: bool,
    prometheus_handle: Option<PrometheusHandle>,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

        Self::register_metrics();

        Ok(Self {
            enabled: true,
            prometheus_handle: Some(handle),
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            prometheus_handle: None,
        }
    }

    fn register_metrics() {
        describe_counter!("shadowd_connections_total", "Accepted client connections");
        describe_counter!("shadowd_requests_total", "Answered requests by response status");
        describe_counter!("shadowd_attacks_total", "Requests classified as attacks");
        describe_counter!("shadowd_signature_failures_total", "Requests rejected for a bad signature");
        describe_counter!("shadowd_parameters_total", "Assessed parameters");
        describe_histogram!("shadowd_assessment_duration_seconds", "Time spent assessing one request");
    }

    /// Serve the Prometheus exposition endpoint until the task is aborted.
    pub async fn start_server(&self, config: &MetricsConfig) -> ShadowdResult<()> {
        let handle = match &self.prometheus_handle {
            Some(handle) => handle.clone(),
            None => return Err(ShadowdError::Internal("Prometheus handle not available".to_string())),
        };

        let app = Router::new()
            .route(&config.path, get(move || async move { handle.render() }))
            .route("/health", get(|| async { "OK" }));

        let addr = format!("{}:{}", config.address, config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|source| ShadowdError::Bind {
            address: addr.clone(),
            source,
        })?;

        info!("Metrics server listening on {}{}", addr, config.path);

        axum::serve(listener, app)
            .await
            .map_err(|e| ShadowdError::Internal(format!("Metrics server error: {}", e)))?;

        Ok(())
    }

    pub fn record_connection(&self) {
        if self.enabled {
            counter!("shadowd_connections_total").increment(1);
        }
    }

    pub fn record_response(&self, status: Status) {
        if !self.enabled {
            return;
        }

        counter!("shadowd_requests_total", "status" => status.as_str()).increment(1);
        match status {
            Status::Attack => counter!("shadowd_attacks_total").increment(1),
            Status::BadSignature => counter!("shadowd_signature_failures_total").increment(1),
            _ => {}
        }
    }

    pub fn record_assessment(&self, assessment: &Assessment, duration: Duration) {
        if !self.enabled {
            return;
        }

        counter!("shadowd_parameters_total").increment(assessment.verdicts.len() as u64);
        histogram!("shadowd_assessment_duration_seconds").record(duration.as_secs_f64());
    }
}
