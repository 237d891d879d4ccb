// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! ES256 signing and verification keys.

use std::{fmt::Debug, io::Read, path::Path};

use openssl::{
    bn::BigNum,
    ec::{EcKey, EcKeyRef},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::{HasParams, PKey, Private, Public},
    x509::X509,
};

use crate::error::Error;

// Size in bytes of each of the r and s integers in an ES256 signature.
const COORDINATE_SIZE: usize = 32;

fn check_curve<T: HasParams>(key: &EcKeyRef<T>) -> Result<(), Error> {
    match key.group().curve_name() {
        Some(Nid::X9_62_PRIME256V1) => Ok(()),
        other => Err(Error::InvalidKey(format!(
            "expected a P-256 key, got curve {other:?}"
        ))),
    }
}

/// A P-256 private key used to sign PASSporTs.
#[derive(Clone)]
pub struct SigningKey {
    key: EcKey<Private>,
}

impl Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SigningKey").field(&"*****").finish()
    }
}

impl SigningKey {
    /// Parse a PEM-encoded EC private key, in either SEC1 or PKCS#8 form.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        let key = PKey::private_key_from_pem(pem)
            .and_then(|pkey| pkey.ec_key())
            .map_err(|error| Error::InvalidKey(format!("unable to parse private key: {error}")))?;
        check_curve(&key)?;
        Ok(Self { key })
    }

    /// Read and parse a PEM-encoded EC private key from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut private_key_buf = vec![];
        std::fs::File::open(path.as_ref())
            .inspect_err(|error| {
                tracing::error!(path = ?path.as_ref(), ?error, "Unable to open private key")
            })?
            .read_to_end(&mut private_key_buf)?;
        Self::from_pem(&private_key_buf)
    }

    /// Sign the SHA-256 digest of `data`, returning the raw `r || s` signature.
    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let digest = openssl::sha::sha256(data);
        let signature = EcdsaSig::sign(&digest, &self.key)?;
        let mut raw = signature.r().to_vec_padded(COORDINATE_SIZE as i32)?;
        raw.extend(signature.s().to_vec_padded(COORDINATE_SIZE as i32)?);
        Ok(raw)
    }

    /// The public half of this key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, Error> {
        let key = EcKey::from_public_key(self.key.group(), self.key.public_key())?;
        Ok(VerifyingKey { key })
    }
}

/// A P-256 public key used to verify PASSporTs.
#[derive(Debug, Clone)]
pub struct VerifyingKey {
    key: EcKey<Public>,
}

impl VerifyingKey {
    /// Parse a PEM document holding either a public key or a certificate.
    ///
    /// If a certificate chain is provided, the first certificate is used.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        if pem
            .windows(b"CERTIFICATE-----".len())
            .any(|window| window == b"CERTIFICATE-----")
        {
            let certificate = X509::from_pem(pem).map_err(|error| {
                Error::InvalidKey(format!("unable to parse certificate: {error}"))
            })?;
            return Self::from_certificate(&certificate);
        }

        let key = PKey::public_key_from_pem(pem)
            .and_then(|pkey| pkey.ec_key())
            .map_err(|error| Error::InvalidKey(format!("unable to parse public key: {error}")))?;
        check_curve(&key)?;
        Ok(Self { key })
    }

    /// Extract the public key from a certificate.
    pub fn from_certificate(certificate: &X509) -> Result<Self, Error> {
        let key = certificate
            .public_key()
            .and_then(|pkey| pkey.ec_key())
            .map_err(|error| {
                Error::InvalidKey(format!("certificate does not hold an EC key: {error}"))
            })?;
        check_curve(&key)?;
        Ok(Self { key })
    }

    /// Read and parse a PEM-encoded public key or certificate from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let pem = std::fs::read(path.as_ref()).inspect_err(|error| {
            tracing::error!(path = ?path.as_ref(), ?error, "Unable to read public key")
        })?;
        Self::from_pem(&pem)
    }

    /// Verify a raw `r || s` signature over the SHA-256 digest of `data`.
    pub(crate) fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        if signature.len() != COORDINATE_SIZE * 2 {
            tracing::debug!(length = signature.len(), "Signature has the wrong length");
            return Err(Error::InvalidSignature);
        }
        let (r, s) = signature.split_at(COORDINATE_SIZE);
        let signature =
            EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
        let digest = openssl::sha::sha256(data);
        if signature.verify(&digest, &self.key)? {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}
