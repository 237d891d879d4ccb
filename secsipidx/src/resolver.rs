// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Turn the overlapping input options into exactly one signing or checking call.
//!
//! The header and the payload are each resolved independently: a file takes precedence
//! over an inline value, which takes precedence over building the document from the
//! individual scalar options. Text from a file or an inline value is passed through
//! unchanged unless `--json-parse` is set, in which case it is parsed into the typed
//! document.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use secsipid::{Engine, Header, IdentityFields, Payload};
use serde::de::DeserializeOwned;

use crate::config::{non_empty, Config};

/// Problems with the provided input, detected before the engine is involved.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("the private key path is not provided")]
    MissingPrivateKey,
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {document} JSON: {source}")]
    Parse {
        document: &'static str,
        source: serde_json::Error,
    },
    #[error(
        "the header and payload must both be JSON text or both be structured values; \
         provide both documents or use --json-parse"
    )]
    MixedRepresentation,
    #[error("the identity value is not provided")]
    MissingIdentity,
    #[error("expected at least 5 comma-separated fields, got {0}")]
    TooFewFields(usize),
}

/// A document that is either typed or opaque JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    Typed(T),
    Raw(String),
}

/// What gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignContent {
    /// A typed header and payload, serialized by the engine.
    Structured(Header, Payload),
    /// Header and payload JSON text, signed exactly as provided.
    RawText(String, String),
}

/// A fully resolved signing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub content: SignContent,
    pub private_key: PathBuf,
}

impl SignRequest {
    /// Resolve the signing input from the configuration.
    pub fn resolve(config: &Config) -> Result<Self, ResolveError> {
        let private_key = non_empty(&config.fprvkey)
            .ok_or(ResolveError::MissingPrivateKey)?
            .clone();

        let header = resolve_document(
            "header",
            non_empty(&config.fheader).map(PathBuf::as_path),
            non_empty(&config.header).map(String::as_str),
            config.json_parse,
            || header_from_scalars(config),
        )?;
        let payload = resolve_document(
            "payload",
            non_empty(&config.fpayload).map(PathBuf::as_path),
            non_empty(&config.payload).map(String::as_str),
            config.json_parse,
            || payload_from_scalars(config),
        )?;

        let content = match (header, payload) {
            (Resolved::Typed(header), Resolved::Typed(payload)) => {
                SignContent::Structured(header, payload)
            }
            (Resolved::Raw(header), Resolved::Raw(payload)) => SignContent::RawText(header, payload),
            _ => return Err(ResolveError::MixedRepresentation),
        };

        Ok(Self {
            content,
            private_key,
        })
    }

    /// Sign the content, returning the compact token.
    pub fn sign(&self, engine: &Engine) -> Result<String, secsipid::Error> {
        match &self.content {
            SignContent::Structured(header, payload) => {
                tracing::info!(private_key = ?self.private_key, "Signing using structured header and payload");
                engine.encode(header, payload, &self.private_key)
            }
            SignContent::RawText(header, payload) => {
                tracing::info!(private_key = ?self.private_key, "Signing using JSON header and payload text");
                engine.encode_text(header, payload, &self.private_key)
            }
        }
    }
}

/// A fully resolved checking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub identity: String,
    pub expire: u64,
    /// The verification key; if unset, the certificate is retrieved from the token's `x5u`.
    pub public_key: Option<PathBuf>,
    pub timeout: Duration,
}

impl CheckRequest {
    /// Resolve the identity to check from the configuration.
    ///
    /// The identity file takes precedence over the inline value.
    pub fn resolve(config: &Config) -> Result<Self, ResolveError> {
        let identity = match (non_empty(&config.fidentity), non_empty(&config.identity)) {
            (Some(path), _) => read(path)?,
            (None, Some(identity)) => identity.clone(),
            (None, None) => return Err(ResolveError::MissingIdentity),
        };
        Ok(Self::with_identity(config, identity))
    }

    /// A check of the given identity using the configured key, expiry, and timeout.
    pub fn with_identity(config: &Config, identity: String) -> Self {
        Self {
            identity,
            expire: config.expire,
            public_key: non_empty(&config.fpubkey).cloned(),
            timeout: Duration::from_secs(config.timeout),
        }
    }

    /// Check the identity, returning the verified payload.
    pub async fn check(&self, engine: &Engine) -> Result<Payload, secsipid::Error> {
        engine
            .check_full_identity(
                &self.identity,
                self.expire,
                self.public_key.as_deref(),
                self.timeout,
            )
            .await
    }
}

/// The identity values for a full identity, taken from the individual options.
pub fn identity_fields(config: &Config) -> IdentityFields {
    IdentityFields {
        orig_tn: config.orig_tn.clone(),
        dest_tn: config.dest_tn.clone(),
        attest: config.attest.clone(),
        orig_id: config.orig_id.clone(),
        x5u: config.x5u.clone(),
    }
}

/// The identity values for a full identity from a `origTN,destTN,attest,origID,x5u` line.
///
/// Fields beyond the fifth are ignored.
pub fn identity_fields_from_csv(line: &str) -> Result<IdentityFields, ResolveError> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    match fields.as_slice() {
        [orig_tn, dest_tn, attest, orig_id, x5u, ..] => Ok(IdentityFields {
            orig_tn: orig_tn.to_string(),
            dest_tn: dest_tn.to_string(),
            attest: attest.to_string(),
            orig_id: orig_id.to_string(),
            x5u: x5u.to_string(),
        }),
        _ => Err(ResolveError::TooFewFields(fields.len())),
    }
}

fn read(path: &Path) -> Result<String, ResolveError> {
    std::fs::read_to_string(path).map_err(|source| ResolveError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_document<T: DeserializeOwned>(
    document: &'static str,
    file: Option<&Path>,
    literal: Option<&str>,
    json_parse: bool,
    build: impl FnOnce() -> T,
) -> Result<Resolved<T>, ResolveError> {
    let text = match (file, literal) {
        (Some(path), _) => {
            tracing::debug!(document, ?path, "Using document from file");
            read(path)?
        }
        (None, Some(literal)) => literal.to_string(),
        (None, None) => return Ok(Resolved::Typed(build())),
    };

    if json_parse {
        serde_json::from_str(&text)
            .map(Resolved::Typed)
            .map_err(|source| ResolveError::Parse { document, source })
    } else {
        Ok(Resolved::Raw(text))
    }
}

fn header_from_scalars(config: &Config) -> Header {
    let x5u = if config.x5u.is_empty() {
        secsipid::DEFAULT_X5U
    } else {
        config.x5u.as_str()
    };
    Header {
        alg: config.alg.clone(),
        ppt: config.ppt.clone(),
        typ: config.typ.clone(),
        x5u: x5u.to_string(),
    }
}

fn payload_from_scalars(config: &Config) -> Payload {
    Payload::new(
        config.attest.as_str(),
        config.dest_tn.as_str(),
        config.iat,
        config.orig_tn.as_str(),
        config.orig_id.as_str(),
    )
}
