// TLS termination for client connections

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::SslConfig;
use crate::error::{Result as ShadowdResult, ShadowdError};

/// Build the acceptor from the configured PEM files. Any failure is fatal
/// at startup.
pub fn load_acceptor(config: &SslConfig) -> ShadowdResult<TlsAcceptor> {
    let cert_chain = load_certificates(&config.cert_path)?;
    let private_key = load_private_key(&config.key_path)?;

    if let Some(dh_path) = &config.dh_path {
        check_dh_parameters(dh_path)?;
        warn!(
            "DH parameters from {} are ignored, ephemeral key exchange uses ECDHE",
            dh_path
        );
    }

    let server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| ShadowdError::Tls(format!("Failed to configure certificate: {}", e)))?;

    info!("TLS enabled with certificate chain {}", config.cert_path);
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn open(path: &str) -> ShadowdResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ShadowdError::Tls(format!("Failed to open {}: {}", path, e)))
}

fn load_certificates(path: &str) -> ShadowdResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ShadowdError::Tls(format!("Failed to parse certificates in {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(ShadowdError::Tls(format!("No certificates found in {}", path)));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> ShadowdResult<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ShadowdError::Tls(format!("Failed to parse private key in {}: {}", path, e)))?
        .ok_or_else(|| ShadowdError::Tls(format!("No private key found in {}", path)))
}

fn check_dh_parameters(path: &str) -> ShadowdResult<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ShadowdError::Tls(format!("Failed to read DH parameters {}: {}", path, e)))?;

    if !content.contains("-----BEGIN DH PARAMETERS-----") {
        return Err(ShadowdError::Tls(format!("{} does not contain PEM DH parameters", path)));
    }
    Ok(())
}
