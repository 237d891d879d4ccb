// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The SIP Identity header and the [`Engine`] that builds and checks it.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::instrument;

use crate::{
    cache::CertFetcher,
    error::Error,
    keys::{SigningKey, VerifyingKey},
    passport::{self, Header, Payload},
    verify::{CertVerifier, CertVerify},
};

/// Certificate handling options for the [`Engine`].
///
/// These are set once when the engine is created and apply to every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Directory used to cache certificates retrieved from `x5u` locations.
    ///
    /// If unset, certificates are retrieved on every verification.
    pub cache_dir: Option<PathBuf>,
    /// How long a cached certificate may be reused.
    pub cache_expire: Duration,
    /// PEM file with the trusted root certificates.
    pub ca_file: Option<PathBuf>,
    /// PEM file with intermediate certificates.
    pub ca_inter: Option<PathBuf>,
    /// PEM file with the certificate revocation list.
    pub crl_file: Option<PathBuf>,
    /// The checks applied to retrieved certificates.
    pub cert_verify: CertVerify,
    /// The certificate location used when building an identity without an explicit `x5u`.
    pub x5u: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_expire: Duration::from_secs(3600),
            ca_file: None,
            ca_inter: None,
            crl_file: None,
            cert_verify: CertVerify::NONE,
            x5u: None,
        }
    }
}

/// The values needed to build an identity without a full header or payload document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFields {
    /// The origination (calling) telephone number.
    pub orig_tn: String,
    /// The destination (called) telephone number.
    pub dest_tn: String,
    /// The attestation level.
    pub attest: String,
    /// The origination identifier; a random UUID is used if empty.
    pub orig_id: String,
    /// The certificate location; the engine default is used if empty.
    pub x5u: String,
}

/// A parsed SIP Identity header value.
///
/// The value has the form `<token>;info=<x5u>;alg=ES256;ppt=shaken`. Parameters
/// other than `info`, `alg` and `ppt` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// The compact PASSporT.
    pub token: String,
    /// The `info` parameter, without angle brackets.
    pub info: Option<String>,
    /// The `alg` parameter.
    pub alg: Option<String>,
    /// The `ppt` parameter, without quotes.
    pub ppt: Option<String>,
}

impl Identity {
    /// Parse an Identity header value.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let mut parts = value.trim().split(';');
        let token = parts
            .next()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::InvalidIdentity("the token is missing".to_string()))?;

        let mut identity = Self {
            token: token.to_string(),
            ..Default::default()
        };
        for parameter in parts.map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = parameter.split_once('=').ok_or_else(|| {
                Error::InvalidIdentity(format!("parameter '{parameter}' has no value"))
            })?;
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "info" => {
                    let info = value
                        .strip_prefix('<')
                        .and_then(|v| v.strip_suffix('>'))
                        .unwrap_or(value);
                    identity.info = Some(info.to_string());
                }
                "alg" => identity.alg = Some(value.to_string()),
                "ppt" => identity.ppt = Some(value.trim_matches('"').to_string()),
                other => tracing::debug!(parameter = other, "Ignoring unknown identity parameter"),
            }
        }

        Ok(identity)
    }

    /// Format a token and certificate location as an Identity header value.
    pub fn header_value(token: &str, x5u: &str) -> String {
        format!(
            "{token};info=<{x5u}>;alg={};ppt={}",
            crate::ALGORITHM,
            crate::EXTENSION
        )
    }

    fn check_parameters(&self) -> Result<(), Error> {
        if let Some(alg) = self.alg.as_deref().filter(|alg| *alg != crate::ALGORITHM) {
            return Err(Error::UnsupportedHeader(format!(
                "unsupported identity algorithm '{alg}'"
            )));
        }
        if let Some(ppt) = self.ppt.as_deref().filter(|ppt| *ppt != crate::EXTENSION) {
            return Err(Error::UnsupportedHeader(format!(
                "unsupported identity extension '{ppt}'"
            )));
        }
        Ok(())
    }
}

/// Signs and verifies identities using a fixed set of certificate handling [`Options`].
///
/// The engine is cheap to clone and safe to share between tasks.
#[derive(Debug, Clone)]
pub struct Engine {
    options: Options,
    fetcher: CertFetcher,
    verifier: CertVerifier,
}

impl Engine {
    /// Create an engine with the given options.
    pub fn new(options: Options) -> Result<Self, Error> {
        let fetcher = CertFetcher::new(options.cache_dir.clone(), options.cache_expire)?;
        let verifier = CertVerifier {
            mode: options.cert_verify,
            ca_file: options.ca_file.clone(),
            ca_inter: options.ca_inter.clone(),
            crl_file: options.crl_file.clone(),
        };
        tracing::debug!(?options, "Configured the identity engine");
        Ok(Self {
            options,
            fetcher,
            verifier,
        })
    }

    /// Sign a typed header and payload with the private key at `private_key`.
    #[instrument(skip_all, err)]
    pub fn encode(
        &self,
        header: &Header,
        payload: &Payload,
        private_key: &Path,
    ) -> Result<String, Error> {
        let key = SigningKey::from_file(private_key)?;
        passport::encode(header, payload, &key)
    }

    /// Sign a header and payload given as JSON text with the private key at `private_key`.
    #[instrument(skip_all, err)]
    pub fn encode_text(
        &self,
        header: &str,
        payload: &str,
        private_key: &Path,
    ) -> Result<String, Error> {
        let key = SigningKey::from_file(private_key)?;
        passport::encode_text(header, payload, &key)
    }

    /// Build and sign an identity from individual values, returning the Identity header value.
    #[instrument(skip(self), err)]
    pub fn get_identity(
        &self,
        fields: &IdentityFields,
        private_key: &Path,
    ) -> Result<String, Error> {
        let x5u = if fields.x5u.is_empty() {
            self.options.x5u.as_deref().unwrap_or(crate::DEFAULT_X5U)
        } else {
            fields.x5u.as_str()
        };
        let orig_id = if fields.orig_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            fields.orig_id.clone()
        };

        let header = Header::shaken(x5u);
        let payload = Payload::new(
            fields.attest.as_str(),
            fields.dest_tn.as_str(),
            0,
            fields.orig_tn.as_str(),
            orig_id,
        );
        let token = self.encode(&header, &payload, private_key)?;

        Ok(Identity::header_value(&token, x5u))
    }

    /// Check an Identity header value.
    ///
    /// If `public_key` is provided, it is used to verify the token. Otherwise, the
    /// certificate referenced by the token's `x5u` (or the identity's `info` parameter) is
    /// retrieved within `timeout` and verified according to the engine options.
    ///
    /// On success, the verified payload is returned.
    #[instrument(skip(self, identity), err)]
    pub async fn check_full_identity(
        &self,
        identity: &str,
        expire: u64,
        public_key: Option<&Path>,
        timeout: Duration,
    ) -> Result<Payload, Error> {
        let identity = Identity::parse(identity)?;
        identity.check_parameters()?;

        let key = match public_key {
            Some(path) => VerifyingKey::from_file(path)?,
            None => {
                let header = passport::decode_header(&identity.token)?;
                let x5u = Some(header.x5u)
                    .filter(|x5u| !x5u.is_empty())
                    .or(identity.info)
                    .ok_or(Error::MissingKey)?;
                self.certificate_key(&x5u, timeout).await?
            }
        };

        let payload = passport::decode(&identity.token, expire, &key)?;
        tracing::info!(orig = payload.orig.tn, attest = payload.attest, "Identity verified");
        Ok(payload)
    }

    async fn certificate_key(&self, x5u: &str, timeout: Duration) -> Result<VerifyingKey, Error> {
        let pem = self.fetcher.fetch(x5u, timeout).await?;
        let verifier = self.verifier.clone();
        let certificate = tokio::task::spawn_blocking(move || verifier.verify(&pem))
            .await
            .map_err(|error| Error::Io(std::io::Error::other(error)))??;
        VerifyingKey::from_certificate(&certificate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_identity() -> anyhow::Result<()> {
        let identity = Identity::parse(
            " aaa.bbb.ccc;info=<https://certs.example.org/a.pem>;alg=ES256;ppt=\"shaken\" ",
        )?;
        assert_eq!(identity.token, "aaa.bbb.ccc");
        assert_eq!(
            identity.info.as_deref(),
            Some("https://certs.example.org/a.pem")
        );
        assert_eq!(identity.alg.as_deref(), Some("ES256"));
        assert_eq!(identity.ppt.as_deref(), Some("shaken"));
        identity.check_parameters()?;
        Ok(())
    }

    #[test]
    fn parse_bare_token() -> anyhow::Result<()> {
        let identity = Identity::parse("aaa.bbb.ccc")?;
        assert_eq!(identity.token, "aaa.bbb.ccc");
        assert_eq!(identity.info, None);
        Ok(())
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(Identity::parse("  "), Err(Error::InvalidIdentity(_))));
        assert!(matches!(
            Identity::parse("aaa.bbb.ccc;info"),
            Err(Error::InvalidIdentity(_))
        ));
    }

    #[test]
    fn unsupported_parameters() -> anyhow::Result<()> {
        let identity = Identity::parse("a.b.c;alg=RS256")?;
        assert!(matches!(
            identity.check_parameters(),
            Err(Error::UnsupportedHeader(_))
        ));
        let identity = Identity::parse("a.b.c;ppt=div")?;
        assert!(matches!(
            identity.check_parameters(),
            Err(Error::UnsupportedHeader(_))
        ));
        Ok(())
    }

    #[test]
    fn header_value_format() {
        assert_eq!(
            Identity::header_value("a.b.c", "https://x/y.pem"),
            "a.b.c;info=<https://x/y.pem>;alg=ES256;ppt=shaken"
        );
    }
}
