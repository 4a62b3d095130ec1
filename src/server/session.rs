use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::analyzer::Analyzer;
use crate::error::{Result as ShadowdResult, ShadowdError};
use crate::observability::{Logger, MetricsCollector, Severity};
use crate::profile::ProfileStore;
use crate::protocol::{self, Response};
use crate::storage::{Database, NewRequest};
use super::audit;

/// Services every session works with, constructed once at startup.
pub struct SessionContext {
    pub profiles: ProfileStore,
    pub analyzer: Arc<Analyzer>,
    pub database: Arc<dyn Database>,
    pub logger: Arc<Logger>,
    pub metrics: Arc<MetricsCollector>,
    pub max_frame_size: usize,
    pub read_timeout: Duration,
}

/// One client connection. Owns its stream; nothing mutable is shared with
/// other sessions.
pub struct Session<S> {
    stream: S,
    /// Peer address, used as the profile's registered server address.
    server_address: String,
    context: Arc<SessionContext>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, server_address: String, context: Arc<SessionContext>) -> Self {
        Self {
            stream,
            server_address,
            context,
        }
    }

    /// Serve request frames until the peer hangs up or a request is rejected.
    pub async fn run(mut self) {
        loop {
            let read = tokio::time::timeout(
                self.context.read_timeout,
                protocol::read_frame(&mut self.stream, self.context.max_frame_size),
            )
            .await;

            let frame = match read {
                Err(_) => {
                    self.report(Severity::Debug, "idle timeout").await;
                    break;
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(frame))) => frame,
                Ok(Err(ShadowdError::Io(e))) => {
                    self.report(Severity::Info, &format!("read failed: {}", e)).await;
                    break;
                }
                Ok(Err(e)) => {
                    self.reject(&e).await;
                    break;
                }
            };

            match self.handle_frame(&frame).await {
                Ok(response) => {
                    self.context.metrics.record_response(response.status);
                    if let Err(e) = protocol::write_response(&mut self.stream, &response).await {
                        self.report(Severity::Info, &format!("write failed: {}", e)).await;
                        break;
                    }
                }
                Err(e) => {
                    self.reject(&e).await;
                    if e.closes_connection() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.server_address, e);
        }
    }

    /// Authenticate, assess and record one request.
    async fn handle_frame(&self, frame: &[u8]) -> ShadowdResult<Response> {
        let envelope = protocol::decode_envelope(frame)?;

        let profile = self
            .context
            .profiles
            .get_profile(&self.server_address, envelope.profile_id)
            .await?;

        protocol::verify(&profile.shared_secret, &envelope)?;
        let request = protocol::decode_request(&envelope)?;

        let assessment = self
            .context
            .analyzer
            .assess(&profile, &request.caller, &request.parameters)
            .await?;

        audit::record(
            self.context.database.as_ref(),
            &NewRequest {
                profile_id: profile.id,
                caller: request.caller.clone(),
                // The client's hint is kept for the audit trail but never
                // relaxes enforcement.
                learning: profile.learning || request.learning,
                client_address: request.client_address.clone(),
            },
            &assessment,
        )
        .await?;

        Ok(Response::from_assessment(&assessment))
    }

    /// Report a failed request and answer it with its error status.
    async fn reject(&mut self, error: &ShadowdError) {
        let severity = match error {
            ShadowdError::BadSignature(_) | ShadowdError::ProfileNotFound { .. } => Severity::Warning,
            ShadowdError::Frame(_) | ShadowdError::BadRequest(_) | ShadowdError::Json(_) => Severity::Info,
            ShadowdError::Database(_) => Severity::Critical,
            _ => Severity::Error,
        };
        self.report(severity, &format!("{} ({})", error, error.error_code())).await;

        let status = error.status();
        self.context.metrics.record_response(status);
        if let Err(e) = protocol::write_response(&mut self.stream, &Response::error(status)).await {
            debug!("Could not send error response to {}: {}", self.server_address, e);
        }
    }

    async fn report(&self, severity: Severity, message: &str) {
        self.context
            .logger
            .report(severity, &format!("{}: {}", self.server_address, message))
            .await;
    }
}
