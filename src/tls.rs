//! Server-side TLS context.

use std::sync::Arc;

use rustls::version::{TLS12, TLS13};
use rustls::{Certificate, PrivateKey, ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use tokio_rustls::TlsAcceptor;

use crate::config::{TlsOptions, TlsVersion};
use crate::error::{Error, Result};

/// Builds an acceptor from the certificate and key files named in `options`.
///
/// # Errors
///
/// Returns [`Error::Config`] when a file cannot be read or parsed, and
/// [`Error::Tls`] when rustls refuses the resulting configuration.
pub fn acceptor(options: &TlsOptions) -> Result<TlsAcceptor> {
    let cert_pem = std::fs::read(&options.cert)
        .map_err(|e| Error::Config(format!("failed to open certificate {:?}: {e}", options.cert)))?;
    let key_pem = std::fs::read(&options.key)
        .map_err(|e| Error::Config(format!("failed to open private key {:?}: {e}", options.key)))?;
    let acceptor = acceptor_from_pem(&cert_pem, &key_pem, options)?;
    tracing::info!(cert = ?options.cert, "TLS enabled");
    Ok(acceptor)
}

/// Builds an acceptor from PEM data already in memory.
///
/// # Errors
///
/// See [`acceptor`].
pub fn acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8], options: &TlsOptions) -> Result<TlsAcceptor> {
    let cert_chain: Vec<Certificate> = certs(&mut &cert_pem[..])
        .map_err(|_| Error::Config("failed to parse certificate".into()))?
        .into_iter()
        .map(Certificate)
        .collect();
    if cert_chain.is_empty() {
        return Err(Error::Config("no certificate found".into()));
    }

    let mut keys = pkcs8_private_keys(&mut &key_pem[..])
        .map_err(|_| Error::Config("failed to parse private key".into()))?;
    if keys.is_empty() {
        keys = rsa_private_keys(&mut &key_pem[..])
            .map_err(|_| Error::Config("failed to parse private key".into()))?;
    }
    if keys.is_empty() {
        return Err(Error::Config("no private key found".into()));
    }
    let private_key = PrivateKey(keys.remove(0));

    let versions = protocol_versions(options.min_version, options.max_version)?;
    let mut config = ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&versions)?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)?;
    config.alpn_protocols = options.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn protocol_versions(
    min: TlsVersion,
    max: TlsVersion,
) -> Result<Vec<&'static SupportedProtocolVersion>> {
    let versions: Vec<_> = [(TlsVersion::Tls12, &TLS12), (TlsVersion::Tls13, &TLS13)]
        .into_iter()
        .filter(|(v, _)| (min..=max).contains(v))
        .map(|(_, supported)| supported)
        .collect();
    if versions.is_empty() {
        return Err(Error::Config(format!("no TLS version between {min} and {max}")));
    }
    Ok(versions)
}
