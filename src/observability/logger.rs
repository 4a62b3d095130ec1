use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::LoggingConfig;

/// Severity of a reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Security log entry
#[derive(Debug, Clone, serde::Serialize)]
pub struct SecurityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Reporting sink for runtime events.
///
/// Every event goes to `tracing`; when a security log is configured it is
/// also appended there as one JSON object per line.
pub struct Logger {
    security_log: Option<Mutex<tokio::fs::File>>,
}

impl Logger {
    pub fn new(config: &LoggingConfig) -> Result<Self> {
        let security_log = match &config.security_log {
            Some(path) => Some(Mutex::new(Self::create_log_writer(path)?)),
            None => None,
        };

        Ok(Self { security_log })
    }

    /// Logger that only forwards to `tracing`.
    #[cfg(test)]
    pub fn tracing_only() -> Self {
        Self { security_log: None }
    }

    fn create_log_writer(output_path: &str) -> Result<tokio::fs::File> {
        std::fs::create_dir_all(
            std::path::Path::new(output_path).parent().unwrap_or(std::path::Path::new(".")),
        )?;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_path)?;

        Ok(tokio::fs::File::from_std(file))
    }

    pub async fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => debug!("{}", message),
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error | Severity::Critical => error!(severity = %severity, "{}", message),
        }

        if let Some(writer) = &self.security_log {
            let entry = SecurityLogEntry {
                timestamp: Utc::now(),
                severity,
                message: message.to_string(),
            };

            let line = format!("{}\n", serde_json::to_string(&entry).unwrap_or_default());
            let mut file = writer.lock().await;
            if let Err(e) = file.write_all(line.as_bytes()).await {
                error!("Failed to write security log: {}", e);
                return;
            }
            if let Err(e) = file.flush().await {
                error!("Failed to flush security log: {}", e);
            }
        }
    }
}
