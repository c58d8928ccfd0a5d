//! STARTTLS acceptor construction, shared by the SMTP Receiver (server side)
//! and the Delivery Router (client side TLS verification is left to
//! `mail-send`'s own rustls integration — this module only builds the
//! server `Arc<ServerConfig>` the receiver upgrades a connection with).

use std::{io::BufReader, sync::Arc};

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::{CommonError, CommonResult};

/// Loads a PEM certificate chain and private key from disk and builds a
/// [`TlsAcceptor`] for STARTTLS upgrades.
pub fn load_acceptor(cert_path: &str, key_path: &str) -> CommonResult<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| CommonError::config(format!("failed to open TLS cert {cert_path}: {e}")))?;
    let key_file = std::fs::File::open(key_path)
        .map_err(|e| CommonError::config(format!("failed to open TLS key {key_path}: {e}")))?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<_, _>>()
            .map_err(|e| CommonError::config(format!("invalid TLS certificate chain: {e}")))?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| CommonError::config(format!("invalid TLS private key: {e}")))?
        .ok_or_else(|| CommonError::config("no private key found in TLS key file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CommonError::config(format!("failed to build TLS server config: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
