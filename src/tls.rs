//! HTTPS listener support
//!
//! A self-signed certificate is generated once per workspace with the
//! `openssl` tool. The TLS listener accepts TCP connections, performs the
//! handshake with `tokio-rustls` and hands each stream to hyper with the
//! same Axum router the HTTP listener uses.

use crate::error::{RuntimeError, RuntimeResult};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info, warn};

pub const KEY_FILE: &str = "server.key";
pub const CERT_FILE: &str = "server.crt";

/// Days a generated certificate is valid
const VALIDITY_DAYS: u32 = 365;

/// Make sure `dir` holds a key and certificate, generating a self-signed
/// pair when either is missing. Returns `(cert, key)` paths.
pub async fn ensure_certificate(dir: &Path, bits: u32) -> RuntimeResult<(PathBuf, PathBuf)> {
    tokio::fs::create_dir_all(dir).await?;
    let key = dir.join(KEY_FILE);
    let cert = dir.join(CERT_FILE);

    if key.is_file() && cert.is_file() {
        info!("SSL certificate already exists. Skipping generation.");
        return Ok((cert, key));
    }

    info!("Generating a new self-signed SSL certificate with {}-bit key...", bits);
    let status = Command::new("openssl")
        .arg("req")
        .arg("-x509")
        .arg("-newkey")
        .arg(format!("rsa:{}", bits))
        .arg("-keyout")
        .arg(&key)
        .arg("-out")
        .arg(&cert)
        .arg("-days")
        .arg(VALIDITY_DAYS.to_string())
        .arg("-nodes")
        .arg("-subj")
        .arg("/CN=localhost")
        .status()
        .await
        .map_err(|e| RuntimeError::listener(format!("could not run openssl: {}", e)))?;

    if !status.success() {
        return Err(RuntimeError::listener(format!(
            "openssl exited with {}",
            status
        )));
    }
    info!("SSL certificate successfully generated.");
    Ok((cert, key))
}

/// Build a rustls server config from PEM files
pub fn load_server_config(cert: &Path, key: &Path) -> RuntimeResult<Arc<ServerConfig>> {
    let certs = CertificateDer::pem_file_iter(cert)
        .map_err(|e| RuntimeError::listener(format!("{:?}: {}", cert, e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RuntimeError::listener(format!("{:?}: {}", cert, e)))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .map_err(|e| RuntimeError::listener(format!("{:?}: {}", key, e)))?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| RuntimeError::listener(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RuntimeError::listener(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Accept TLS connections forever, serving `app` on each
pub async fn serve(listener: TcpListener, config: Arc<ServerConfig>, app: Router) {
    let acceptor = TlsAcceptor::from(config);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("HTTPS accept failed: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!("HTTPS connection with {} ended: {}", peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_existing_certificate_is_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "key").unwrap();
        std::fs::write(dir.path().join(CERT_FILE), "cert").unwrap();

        let (cert, key) = ensure_certificate(dir.path(), 2048).await.unwrap();
        assert_eq!(std::fs::read_to_string(cert).unwrap(), "cert");
        assert_eq!(std::fs::read_to_string(key).unwrap(), "key");
    }

    #[test]
    fn test_invalid_pem_is_a_listener_error() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join(CERT_FILE);
        let key = dir.path().join(KEY_FILE);
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = load_server_config(&cert, &key).unwrap_err();
        assert!(matches!(err, RuntimeError::Listener(_)));
    }
}
