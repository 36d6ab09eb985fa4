//! rustls client configuration for the proxy transport.
use std::{io::Cursor, sync::Arc};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};

use crate::{Error, Result};

/// Create a `rustls::ClientConfig` from PEM trust material.
///
/// `ca_pem` populates the root store; `identity_pem` is an optional
/// `(certificate chain, private key)` pair presented as client identity.
/// With `accept_invalid` all server certificate verification is disabled.
pub fn rustls_client_config(
    ca_pem: Option<&[u8]>,
    identity_pem: Option<(&[u8], &[u8])>,
    accept_invalid: bool,
) -> Result<ClientConfig> {
    let builder = ClientConfig::builder();
    let builder = if accept_invalid {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification::new()))
    } else {
        let mut roots = RootCertStore::empty();
        if let Some(pem) = ca_pem {
            for cert in rustls_pemfile::certs(&mut Cursor::new(pem)) {
                let cert = cert.map_err(|e| Error::SslError(format!("bad CA certificate: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| Error::SslError(format!("{e}")))?;
            }
            if roots.is_empty() {
                return Err(Error::SslError("no CA certificate found in bundle".into()));
            }
        }
        builder.with_root_certificates(roots)
    };

    let config = match identity_pem {
        Some((cert_pem, key_pem)) => {
            let certs = rustls_pemfile::certs(&mut Cursor::new(cert_pem))
                .collect::<std::io::Result<Vec<CertificateDer<'static>>>>()
                .map_err(|e| Error::SslError(format!("bad client certificate: {e}")))?;
            if certs.is_empty() {
                return Err(Error::SslError("no client certificate found".into()));
            }
            let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut Cursor::new(key_pem))
                .map_err(|e| Error::SslError(format!("bad client key: {e}")))?
                .ok_or_else(|| Error::SslError("no client key found".into()))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::SslError(format!("{e}")))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

#[derive(Debug)]
struct NoCertificateVerification(CryptoProvider);

impl NoCertificateVerification {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider())
    }
}

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
