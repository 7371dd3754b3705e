//! TLS handshake delegate for the listening socket.
//!
//! A [`TlsDelegate`] carries the certificate chain and private key; the
//! server builds a `tokio-rustls` acceptor from it at listen time, after
//! injecting every registered protocol name into the ALPN advertisement.

use std::fmt;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// TLS certificate configuration for handling client connections.
pub struct TlsDelegate {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl fmt::Debug for TlsDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsDelegate").field("certs", &self.cert_chain.len()).finish_non_exhaustive()
    }
}

impl TlsDelegate {
    /// Creates a delegate from an already-loaded chain and key.
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }

    /// Loads the certificate chain and private key from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, ServerError> {
        let mut cert_reader = BufReader::new(File::open(cert_path)?);
        let cert_chain = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

        let mut key_reader = BufReader::new(File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or_else(|| ServerError::io(io::Error::new(io::ErrorKind::InvalidInput, "no private key found")))?;

        Ok(Self { cert_chain, key })
    }

    /// Builds the server-side config, advertising `protocols` via ALPN.
    fn server_config(&self, protocols: &[String]) -> Result<ServerConfig, ServerError> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(ServerError::tls_config)?;

        config.alpn_protocols = protocols.iter().map(|proto| proto.as_bytes().to_vec()).collect();
        Ok(config)
    }

    /// Builds the handshake acceptor, advertising `protocols` via ALPN.
    pub(crate) fn acceptor(&self, protocols: &[String]) -> Result<TlsAcceptor, ServerError> {
        Ok(TlsAcceptor::from(Arc::new(self.server_config(protocols)?)))
    }

    /// The leaf certificate, for test clients that need to trust it.
    #[cfg(test)]
    pub(crate) fn leaf_certificate(&self) -> CertificateDer<'static> {
        self.cert_chain[0].clone()
    }
}

/// Self-signed delegate for tests.
#[cfg(test)]
pub(crate) fn self_signed_delegate() -> TlsDelegate {
    use rustls::pki_types::PrivatePkcs8KeyDer;

    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let cert_der = CertificateDer::from(cert.serialize_der().unwrap());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    TlsDelegate::new(vec![cert_der], key_der)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_carries_alpn_protocols() {
        let delegate = self_signed_delegate();
        let config = delegate.server_config(&["http/1.1".to_owned(), "h2".to_owned()]).unwrap();

        assert!(config.alpn_protocols.contains(&b"http/1.1".to_vec()));
        assert!(config.alpn_protocols.contains(&b"h2".to_vec()));
    }
}
