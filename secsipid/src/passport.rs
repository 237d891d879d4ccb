// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! PASSporT header and payload types, and the compact token form.
//!
//! A token is three unpadded base64url segments separated by dots: the JSON header, the
//! JSON payload, and the ES256 signature over the first two segments.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    keys::{SigningKey, VerifyingKey},
};

/// The PASSporT JOSE header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// The signing algorithm; only `ES256` is supported.
    pub alg: String,
    /// The PASSporT extension, `shaken` for SHAKEN tokens.
    pub ppt: String,
    /// The token type, `passport`.
    pub typ: String,
    /// The location of the certificate used to sign the token.
    pub x5u: String,
}

impl Header {
    /// A SHAKEN header referencing the given certificate location.
    pub fn shaken(x5u: impl Into<String>) -> Self {
        Self {
            alg: crate::ALGORITHM.to_string(),
            ppt: crate::EXTENSION.to_string(),
            typ: crate::TOKEN_TYPE.to_string(),
            x5u: x5u.into(),
        }
    }

    // Only ES256 SHAKEN tokens can be verified.
    fn check(&self) -> Result<(), Error> {
        if self.alg != crate::ALGORITHM {
            return Err(Error::UnsupportedHeader(format!(
                "unsupported algorithm '{}'",
                self.alg
            )));
        }
        if self.ppt != crate::EXTENSION {
            return Err(Error::UnsupportedHeader(format!(
                "unsupported extension '{}'",
                self.ppt
            )));
        }
        Ok(())
    }
}

/// The called party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dest {
    /// Destination telephone numbers.
    pub tn: Vec<String>,
    /// Destination URIs, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uri: Vec<String>,
}

/// The calling party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Orig {
    /// The origination telephone number.
    pub tn: String,
}

/// The PASSporT claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    /// The attestation level: `A`, `B`, or `C`.
    pub attest: String,
    /// The called party.
    pub dest: Dest,
    /// Issued-at time in seconds since the Unix epoch.
    pub iat: i64,
    /// The calling party.
    pub orig: Orig,
    /// The origination identifier, conventionally a UUID.
    pub origid: String,
}

impl Payload {
    /// Build a payload for a single destination number.
    ///
    /// If `iat` is zero, the current time is used.
    pub fn new(
        attest: impl Into<String>,
        dest_tn: impl Into<String>,
        iat: i64,
        orig_tn: impl Into<String>,
        origid: impl Into<String>,
    ) -> Self {
        Self {
            attest: attest.into(),
            dest: Dest {
                tn: vec![dest_tn.into()],
                uri: vec![],
            },
            iat: if iat == 0 {
                chrono::Utc::now().timestamp()
            } else {
                iat
            },
            orig: Orig { tn: orig_tn.into() },
            origid: origid.into(),
        }
    }
}

/// Sign a typed header and payload.
pub fn encode(header: &Header, payload: &Payload, key: &SigningKey) -> Result<String, Error> {
    let header = serde_json::to_string(header)?;
    let payload = serde_json::to_string(payload)?;
    encode_text(&header, &payload, key)
}

/// Sign a header and payload provided as JSON text.
///
/// The text is encoded exactly as provided; it is not parsed or re-serialized.
pub fn encode_text(header: &str, payload: &str, key: &SigningKey) -> Result<String, Error> {
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = key.sign(signing_input.as_bytes())?;
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Split a compact token and decode its header without verifying anything.
pub fn decode_header(token: &str) -> Result<Header, Error> {
    let (header, _, _) = split(token.trim())?;
    Ok(serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header)?)?)
}

/// Verify a token and return its payload.
///
/// If `expire` is non-zero, tokens issued more than `expire` seconds ago are rejected.
pub fn decode(token: &str, expire: u64, key: &VerifyingKey) -> Result<Payload, Error> {
    let token = token.trim();
    let (header, payload, signature) = split(token)?;
    let parsed_header: Header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header)?)?;
    parsed_header.check()?;

    let signature = URL_SAFE_NO_PAD.decode(signature)?;
    let signing_input_length = header.len() + 1 + payload.len();
    key.verify(&token.as_bytes()[..signing_input_length], &signature)?;

    let payload: Payload = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
    if expire > 0 {
        let now = chrono::Utc::now().timestamp();
        let expires_at = payload.iat.saturating_add_unsigned(expire);
        if now > expires_at {
            tracing::debug!(iat = payload.iat, expire, now, "Token has expired");
            return Err(Error::Expired {
                iat: payload.iat,
                expire,
            });
        }
    }

    Ok(payload)
}

fn split(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut segments = token.split('.');
    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => Err(Error::InvalidToken(
            "expected three non-empty segments separated by '.'".to_string(),
        )),
    }
}
