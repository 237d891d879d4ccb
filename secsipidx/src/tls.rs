// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! TLS configuration for the HTTPS listener.

use std::{fmt::Debug, io::Read, path::Path, sync::Arc};

use anyhow::Context;
use axum_server::tls_openssl::OpenSSLConfig;
use openssl::ssl::{SslAcceptor, SslMethod, SslVersion};

/// The server side of the HTTPS listener.
///
/// Clients are not asked for certificates.
pub struct ServerConfig {
    acceptor: SslAcceptor,
}

impl Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig").finish()
    }
}

impl ServerConfig {
    /// Load the PEM certificate chain and private key for the HTTPS listener.
    pub fn new<P: AsRef<Path>>(certificate: P, private_key: P) -> anyhow::Result<Self> {
        let mut private_key_buf = vec![];
        std::fs::File::open(private_key.as_ref())
            .with_context(|| format!("Failed to open {}", private_key.as_ref().display()))?
            .read_to_end(&mut private_key_buf)?;
        let private_key = openssl::pkey::PKey::private_key_from_pem(&private_key_buf)
            .context("Failed to parse the HTTPS private key")?;

        let mut acceptor = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
        acceptor.set_min_proto_version(Some(SslVersion::TLS1_2))?;
        acceptor.set_private_key(&private_key)?;
        acceptor
            .set_certificate_chain_file(certificate.as_ref())
            .with_context(|| {
                format!(
                    "Failed to load the HTTPS certificate {}",
                    certificate.as_ref().display()
                )
            })?;
        acceptor
            .check_private_key()
            .context("The HTTPS private key does not match the certificate")?;

        Ok(Self {
            acceptor: acceptor.build(),
        })
    }

    /// The configuration for an `axum-server` TLS listener.
    pub(crate) fn openssl_config(self) -> OpenSSLConfig {
        OpenSSLConfig::from_acceptor(Arc::new(self.acceptor))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn certs() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../devel/certs/")
    }

    #[test]
    fn load_certificate_and_key() -> anyhow::Result<()> {
        ServerConfig::new(
            certs().join("cert.pem"),
            certs().join("ec256-private.pem"),
        )?;
        Ok(())
    }

    #[test]
    fn mismatched_key() {
        // The CA certificate was issued for a different key.
        let result = ServerConfig::new(certs().join("ca.pem"), certs().join("ec256-private.pem"));
        assert!(result.is_err());
    }

    #[test]
    fn missing_key() {
        let result = ServerConfig::new(certs().join("cert.pem"), certs().join("missing.pem"));
        assert!(result.is_err());
    }
}
