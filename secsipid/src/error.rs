// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Errors that might occur when signing or verifying PASSporTs.

/// Errors the [`crate::Engine`] and the PASSporT helpers may return.
///
/// Each error maps to a negative status code via [`Error::code`], which command-line
/// front-ends can use as a process exit status.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The token is not made of three base64url-encoded segments separated by dots.
    #[error("the token is malformed: {0}")]
    InvalidToken(String),

    /// The Identity header could not be split into a token and its parameters.
    #[error("the identity header is malformed: {0}")]
    InvalidIdentity(String),

    /// The PASSporT header (or the Identity header parameters) declares an algorithm,
    /// extension, or certificate location that is not supported.
    #[error("unsupported PASSporT header: {0}")]
    UnsupportedHeader(String),

    /// The header or payload is not valid JSON, or doesn't match the PASSporT schema.
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// A segment of the token is not valid unpadded base64url.
    #[error("invalid base64url encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The token signature does not match the signing input and the verification key.
    #[error("the token signature is invalid")]
    InvalidSignature,

    /// The token was issued longer ago than the accepted expiration window.
    #[error("the token expired (issued at {iat}, valid for {expire} seconds)")]
    Expired {
        /// The issued-at timestamp from the payload.
        iat: i64,
        /// The accepted validity window, in seconds.
        expire: u64,
    },

    /// Retrieving the certificate referenced by `x5u` failed.
    ///
    /// This is likely due to a temporary networking problem, but could also be
    /// caused by an incorrect URL or an unreachable certificate repository.
    #[error("failed to retrieve the certificate from '{url}': {reason}")]
    CertificateFetch {
        /// The certificate location.
        url: String,
        /// A human-readable reason for the failure.
        reason: String,
    },

    /// The certificate did not pass the configured verification checks.
    #[error("the certificate is not valid: {0}")]
    InvalidCertificate(String),

    /// The key could not be parsed, or is not an EC key on the P-256 curve.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Neither a public key nor a certificate location is available to verify a token.
    #[error("no public key or certificate location available to verify the token")]
    MissingKey,

    /// A general I/O error occurred; it is likely due to a file not existing, or being
    /// unreadable by this process.
    #[error("an I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    /// An OpenSSL operation failed.
    #[error("one or more openssl errors occurred: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// The status code reported for this error.
    ///
    /// Success is reported as `0` by callers; every error is negative.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidToken(_) | Self::InvalidIdentity(_) | Self::Base64(_) => -110,
            Self::UnsupportedHeader(_) => -115,
            Self::Json(_) => -120,
            Self::InvalidSignature => -130,
            Self::Expired { .. } => -131,
            Self::CertificateFetch { .. } => -140,
            Self::InvalidCertificate(_) => -150,
            Self::InvalidKey(_) => -160,
            Self::MissingKey => -161,
            Self::Io(_) => -170,
            Self::Openssl(_) => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn codes_are_negative() {
        let errors = [
            Error::InvalidToken("x".into()),
            Error::UnsupportedHeader("x".into()),
            Error::InvalidSignature,
            Error::Expired { iat: 0, expire: 1 },
            Error::MissingKey,
            Error::Io(std::io::Error::other("x")),
        ];
        assert!(errors.iter().all(|e| e.code() < 0));
    }

    #[test]
    fn signature_and_expiry_are_distinguishable() {
        assert_ne!(
            Error::InvalidSignature.code(),
            Error::Expired { iat: 0, expire: 1 }.code()
        );
    }
}
