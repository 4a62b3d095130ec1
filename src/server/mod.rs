// Connection layer - accepts TLS or plaintext clients and runs one session each

pub mod audit;
pub mod session;
pub mod tls;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::config::{ServerConfig, SslConfig};
use crate::error::{Result as ShadowdResult, ShadowdError};
use crate::observability::Severity;

pub use session::{Session, SessionContext};

pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    context: Arc<SessionContext>,
}

impl Server {
    /// Resolve, bind and listen. Bind failures and unusable TLS material are
    /// fatal.
    pub async fn bind(
        config: &ServerConfig,
        ssl: &SslConfig,
        context: Arc<SessionContext>,
    ) -> ShadowdResult<Self> {
        let tls = if ssl.enabled {
            Some(tls::load_acceptor(ssl)?)
        } else {
            None
        };

        let address = format!("{}:{}", config.address, config.port);
        let endpoint = lookup_host(&address)
            .await
            .map_err(|source| ShadowdError::Bind {
                address: address.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ShadowdError::Config(format!("{} did not resolve", address)))?;

        let listener = Self::listen(endpoint).map_err(|source| ShadowdError::Bind {
            address: address.clone(),
            source,
        })?;

        info!(
            "Listening on {} ({})",
            listener.local_addr()?,
            if tls.is_some() { "tls" } else { "plaintext" }
        );

        Ok(Self {
            listener,
            tls,
            context,
        })
    }

    fn listen(endpoint: SocketAddr) -> std::io::Result<TcpListener> {
        let socket = if endpoint.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(endpoint)?;
        socket.listen(1024)
    }

    pub fn local_addr(&self) -> ShadowdResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves. Sessions already
    /// spawned are left running and are not awaited.
    pub async fn run<F>(self, shutdown: F) -> ShadowdResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.dispatch(stream, peer),
                        Err(e) => {
                            self.context
                                .logger
                                .report(Severity::Error, &format!("Failed to accept connection: {}", e))
                                .await;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        self.context.metrics.record_connection();
        let server_address = peer.ip().to_canonical().to_string();
        let context = self.context.clone();

        match &self.tls {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let handshake = tokio::time::timeout(context.read_timeout, acceptor.accept(stream)).await;
                    match handshake {
                        Ok(Ok(tls_stream)) => {
                            debug!("TLS connection established from {}", peer);
                            Session::new(tls_stream, server_address, context).run().await;
                        }
                        Ok(Err(e)) => {
                            context
                                .logger
                                .report(Severity::Info, &format!("TLS handshake failed for {}: {}", peer, e))
                                .await;
                        }
                        Err(_) => {
                            context
                                .logger
                                .report(Severity::Info, &format!("TLS handshake timed out for {}", peer))
                                .await;
                        }
                    }
                });
            }
            None => {
                tokio::spawn(async move {
                    debug!("Connection established from {}", peer);
                    Session::new(stream, server_address, context).run().await;
                });
            }
        }
    }
}

/// Resolves on SIGINT, SIGTERM or SIGQUIT.
pub async fn shutdown_signal() -> ShadowdResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = interrupt.recv() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
        _ = quit.recv() => info!("Received SIGQUIT"),
    }
    Ok(())
}
