// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.
#![warn(missing_docs)]

/*!
# secsipid

This crate signs and verifies [STIR/SHAKEN][1] PASSporT tokens as carried in the SIP
`Identity` header ([RFC 8224][2], [RFC 8225][3], [RFC 8588][4]).

Tokens are signed with ES256 (ECDSA on P-256 with SHA-256). Verification either uses a
public key provided by the caller, or retrieves the certificate referenced by the token's
`x5u` header, optionally caching it on disk and validating it against a set of trusted
certificate authorities and a revocation list.

The [`Engine`] holds the certificate handling [`Options`] and is meant to be created once
and shared between callers.

[1]: https://www.rfc-editor.org/rfc/rfc8588
[2]: https://www.rfc-editor.org/rfc/rfc8224
[3]: https://www.rfc-editor.org/rfc/rfc8225
[4]: https://www.rfc-editor.org/rfc/rfc8588
*/

mod cache;
pub mod error;
mod identity;
pub mod keys;
pub mod passport;
mod verify;

pub use error::Error;
pub use identity::{Engine, Identity, IdentityFields, Options};
pub use keys::{SigningKey, VerifyingKey};
pub use passport::{Dest, Header, Orig, Payload};
pub use verify::CertVerify;

/// The only signing algorithm supported for SHAKEN PASSporTs.
pub const ALGORITHM: &str = "ES256";

/// The PASSporT extension implemented by this crate.
pub const EXTENSION: &str = "shaken";

/// The PASSporT token type.
pub const TOKEN_TYPE: &str = "passport";

/// The certificate location used when no `x5u` is provided.
pub const DEFAULT_X5U: &str = "https://127.0.0.1/cert.pem";
