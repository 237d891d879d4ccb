// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The configuration for `secsipidx`.
//!
//! All settings are provided on the command line; a few of them can also be provided via
//! `SECSIPIDX_*` environment variables. The configuration is built once at startup and is
//! never modified afterwards, so the HTTP handlers share it without any locking.
//!
//! Empty string values are treated as if the option was not provided.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Serialize;

/// The complete set of options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, clap::Args)]
pub struct Config {
    /// HTTP server bind address, for example `:8080` or `127.0.0.1:8080`.
    #[arg(long, short = 'H', env = "SECSIPIDX_HTTP_SRV")]
    pub http_srv: Option<String>,
    /// HTTPS server bind address; requires `--https-pubkey` and `--https-prvkey`.
    #[arg(long, env = "SECSIPIDX_HTTPS_SRV")]
    pub https_srv: Option<String>,
    /// PEM file with the HTTPS server certificate (chain).
    #[arg(long)]
    pub https_pubkey: Option<PathBuf>,
    /// PEM file with the HTTPS server private key.
    #[arg(long)]
    pub https_prvkey: Option<PathBuf>,
    /// Directory to serve over HTTP under `/v1/pub/`.
    #[arg(long)]
    pub http_dir: Option<PathBuf>,

    /// Path to the private key used to sign.
    #[arg(long, short = 'k', env = "SECSIPIDX_FPRVKEY")]
    pub fprvkey: Option<PathBuf>,
    /// Path to the public key (or certificate) used to check.
    #[arg(long, short = 'p', env = "SECSIPIDX_FPUBKEY")]
    pub fpubkey: Option<PathBuf>,

    /// Header value in JSON format.
    #[arg(long)]
    pub header: Option<String>,
    /// Path to a file with the header value in JSON format.
    #[arg(long)]
    pub fheader: Option<PathBuf>,
    /// Payload value in JSON format.
    #[arg(long)]
    pub payload: Option<String>,
    /// Path to a file with the payload value in JSON format.
    #[arg(long)]
    pub fpayload: Option<PathBuf>,
    /// Identity value to check.
    #[arg(long)]
    pub identity: Option<String>,
    /// Path to a file with the identity value to check.
    #[arg(long)]
    pub fidentity: Option<PathBuf>,

    /// Signing algorithm.
    #[arg(long, default_value = "ES256")]
    pub alg: String,
    /// PASSporT extension.
    #[arg(long, default_value = "shaken")]
    pub ppt: String,
    /// Token type.
    #[arg(long, default_value = "passport")]
    pub typ: String,
    /// Location of the certificate used to sign the token.
    #[arg(long, default_value = "")]
    pub x5u: String,
    /// Attestation level (A, B, or C).
    #[arg(long, short = 'a', default_value = "C")]
    pub attest: String,
    /// Destination (called) number.
    #[arg(long, short = 'd', default_value = "")]
    pub dest_tn: String,
    /// Origination (calling) number.
    #[arg(long, short = 'o', default_value = "")]
    pub orig_tn: String,
    /// Timestamp when the token was created; the current time is used if 0.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub iat: i64,
    /// Origination identifier.
    #[arg(long, default_value = "")]
    pub orig_id: String,

    /// Check the validity of an identity.
    #[arg(long, short = 'c')]
    pub check: bool,
    /// Sign the header and payload, given as JSON documents or built from parameter values.
    #[arg(long, short = 's')]
    pub sign: bool,
    /// Build an identity from the individual parameter values and sign it.
    #[arg(long, short = 'S')]
    pub sign_full: bool,
    /// Parse the JSON header and payload instead of signing the text as provided.
    #[arg(long)]
    pub json_parse: bool,
    /// Duration of token validity in seconds; 0 disables the expiry check.
    #[arg(long, default_value_t = 0)]
    pub expire: u64,
    /// Timeout in seconds when retrieving certificates.
    #[arg(long, default_value_t = 3)]
    pub timeout: u64,
    /// Run the local self-test.
    #[arg(long, short = 'l')]
    pub ltest: bool,
    /// Print the version.
    #[arg(long)]
    pub version: bool,

    /// Directory used to cache retrieved certificates.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
    /// Duration in seconds that cached certificates are reused.
    #[arg(long, default_value_t = 3600)]
    pub cache_expire: u64,
    /// PEM file with the trusted root CA certificates.
    #[arg(long)]
    pub ca_file: Option<PathBuf>,
    /// PEM file with intermediate CA certificates.
    #[arg(long)]
    pub ca_inter: Option<PathBuf>,
    /// PEM file with the certificate revocation list.
    #[arg(long)]
    pub crl_file: Option<PathBuf>,
    /// Certificate verification mode; a bitmask of 1 (validity period), 2 (system CAs),
    /// 4 (CA file), 8 (intermediate file), and 16 (CRL file).
    #[arg(long, default_value_t = 0)]
    pub cert_verify: u32,
    /// Verbosity level.
    #[arg(long, visible_alias = "vl", default_value_t = 0)]
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_srv: None,
            https_srv: None,
            https_pubkey: None,
            https_prvkey: None,
            http_dir: None,
            fprvkey: None,
            fpubkey: None,
            header: None,
            fheader: None,
            payload: None,
            fpayload: None,
            identity: None,
            fidentity: None,
            alg: secsipid::ALGORITHM.to_string(),
            ppt: secsipid::EXTENSION.to_string(),
            typ: secsipid::TOKEN_TYPE.to_string(),
            x5u: String::new(),
            attest: "C".to_string(),
            dest_tn: String::new(),
            orig_tn: String::new(),
            iat: 0,
            orig_id: String::new(),
            check: false,
            sign: false,
            sign_full: false,
            json_parse: false,
            expire: 0,
            timeout: 3,
            ltest: false,
            version: false,
            cache_dir: None,
            cache_expire: 3600,
            ca_file: None,
            ca_inter: None,
            crl_file: None,
            cert_verify: 0,
            verbosity: 0,
        }
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string_pretty(&self).unwrap_or_default()
        )
    }
}

/// Treat empty option values as absent.
pub(crate) fn non_empty<T: AsRef<OsStr>>(value: &Option<T>) -> Option<&T> {
    value.as_ref().filter(|v| !v.as_ref().is_empty())
}

impl Config {
    /// The plain HTTP bind address, if set.
    pub fn http_address(&self) -> Option<&str> {
        non_empty(&self.http_srv).map(String::as_str)
    }

    /// The HTTPS bind address, certificate, and private key, if all three are set.
    pub fn https_settings(&self) -> Option<(&str, &Path, &Path)> {
        match (
            non_empty(&self.https_srv),
            non_empty(&self.https_pubkey),
            non_empty(&self.https_prvkey),
        ) {
            (Some(address), Some(certificate), Some(private_key)) => {
                Some((address.as_str(), certificate.as_path(), private_key.as_path()))
            }
            (Some(address), _, _) => {
                tracing::warn!(
                    address,
                    "HTTPS bind address is set without both --https-pubkey and --https-prvkey; ignoring it"
                );
                None
            }
            _ => None,
        }
    }

    /// Whether at least one listener is configured.
    pub fn serves(&self) -> bool {
        self.http_address().is_some() || self.https_settings().is_some()
    }

    /// The certificate handling options for the identity engine.
    ///
    /// The engine is created from these once, before any mode runs.
    pub fn engine_options(&self) -> secsipid::Options {
        let options = secsipid::Options {
            cache_dir: non_empty(&self.cache_dir).cloned(),
            cache_expire: Duration::from_secs(self.cache_expire),
            ca_file: non_empty(&self.ca_file).cloned(),
            ca_inter: non_empty(&self.ca_inter).cloned(),
            crl_file: non_empty(&self.crl_file).cloned(),
            cert_verify: self.cert_verify.into(),
            x5u: Some(self.x5u.clone()).filter(|x5u| !x5u.is_empty()),
        };
        if let Some(cache_dir) = &options.cache_dir {
            tracing::info!(?cache_dir, expire = self.cache_expire, "Caching certificates");
        }
        if self.cert_verify != 0 {
            tracing::info!(mode = self.cert_verify, "Verifying retrieved certificates");
        }
        options
    }

    /// The default log filter directive for the configured verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
