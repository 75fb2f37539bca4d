//! TLS material loading and the per-connection handshake.

use std::io;
use std::path::Path;

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::TlsConfig;

fn require_file(path: &Path, what: &str) -> io::Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{what} file not found: {}", path.display()),
        ))
    }
}

/// Build an acceptor from the configured PEM certificate chain and key.
pub async fn load_acceptor(config: &TlsConfig) -> io::Result<RustlsAcceptor> {
    let cert_path = Path::new(&config.cert_path);
    let key_path = Path::new(&config.key_path);
    require_file(cert_path, "Certificate")?;
    require_file(key_path, "Private key")?;

    let rustls = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    Ok(RustlsAcceptor::new(rustls))
}

/// Run the server side of the handshake on an already tracked stream.
pub(crate) async fn handshake(
    acceptor: &RustlsAcceptor,
    stream: TcpStream,
) -> io::Result<impl AsyncRead + AsyncWrite + Unpin + Send + 'static> {
    let (stream, ()) = acceptor.accept(stream, ()).await?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_not_found() {
        let config = TlsConfig {
            cert_path: "/nonexistent/cert.pem".to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
        };
        let err = load_acceptor(&config).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("Certificate"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let cert = std::env::temp_dir().join(format!("cert-{}.pem", std::process::id()));
        std::fs::write(&cert, b"").unwrap();
        let config = TlsConfig {
            cert_path: cert.display().to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
        };
        let err = load_acceptor(&config).await.unwrap_err();
        let _ = std::fs::remove_file(&cert);
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("Private key"));
    }
}
