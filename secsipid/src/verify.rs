// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::path::PathBuf;

use openssl::{
    asn1::Asn1Time,
    ssl::SslFiletype,
    stack::Stack,
    x509::{
        store::{X509Lookup, X509StoreBuilder},
        verify::X509VerifyFlags,
        X509StoreContext, X509,
    },
};

use crate::error::Error;

/// The certificate checks applied to certificates retrieved from `x5u`.
///
/// This is a bitmask; checks can be combined by adding their values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertVerify(u32);

impl CertVerify {
    /// No checks; the certificate's key is trusted as-is.
    pub const NONE: Self = Self(0);
    /// The leaf certificate must be within its validity period.
    pub const TIME: Self = Self(1);
    /// The chain must lead to a certificate in the system trust store.
    pub const SYSTEM_CA: Self = Self(2);
    /// The chain must lead to a certificate in the configured CA file.
    pub const CA_FILE: Self = Self(4);
    /// Certificates in the configured intermediate file may be used to build the chain.
    pub const INTERMEDIATE: Self = Self(8);
    /// The leaf certificate must not be revoked by the configured CRL.
    pub const CRL: Self = Self(16);

    /// Check whether all of the checks in `other` are enabled.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    // Any of the checks that need a trust store.
    fn needs_chain(self) -> bool {
        self.0 & (Self::SYSTEM_CA.0 | Self::CA_FILE.0 | Self::INTERMEDIATE.0 | Self::CRL.0) != 0
    }
}

impl From<u32> for CertVerify {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::ops::BitOr for CertVerify {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Validates certificate chains according to the [`CertVerify`] mode.
#[derive(Debug, Clone, Default)]
pub(crate) struct CertVerifier {
    pub(crate) mode: CertVerify,
    pub(crate) ca_file: Option<PathBuf>,
    pub(crate) ca_inter: Option<PathBuf>,
    pub(crate) crl_file: Option<PathBuf>,
}

impl CertVerifier {
    /// Validate the PEM certificate chain and return the leaf certificate.
    ///
    /// The first certificate in the document is the leaf; any following certificates are
    /// treated as untrusted intermediates.
    pub(crate) fn verify(&self, pem: &[u8]) -> Result<X509, Error> {
        let mut certificates = X509::stack_from_pem(pem)
            .map_err(|error| Error::InvalidCertificate(format!("unable to parse: {error}")))?
            .into_iter();
        let leaf = certificates
            .next()
            .ok_or_else(|| Error::InvalidCertificate("no certificate found".to_string()))?;

        if self.mode.contains(CertVerify::TIME) {
            let now = Asn1Time::days_from_now(0)?;
            if leaf.not_before() > now {
                return Err(Error::InvalidCertificate(format!(
                    "not valid before {}",
                    leaf.not_before()
                )));
            }
            if leaf.not_after() < now {
                return Err(Error::InvalidCertificate(format!(
                    "expired at {}",
                    leaf.not_after()
                )));
            }
        }

        if !self.mode.needs_chain() {
            return Ok(leaf);
        }

        let mut chain = Stack::new()?;
        for certificate in certificates {
            chain.push(certificate)?;
        }
        let mut store = X509StoreBuilder::new()?;
        if self.mode.contains(CertVerify::SYSTEM_CA) {
            store.set_default_paths()?;
        }
        if self.mode.contains(CertVerify::CA_FILE) {
            let ca_file = self.ca_file.as_ref().ok_or_else(|| {
                Error::InvalidCertificate("CA file verification requested without a CA file".into())
            })?;
            for ca in X509::stack_from_pem(&std::fs::read(ca_file)?)? {
                store.add_cert(ca)?;
            }
        }
        if self.mode.contains(CertVerify::INTERMEDIATE) {
            let ca_inter = self.ca_inter.as_ref().ok_or_else(|| {
                Error::InvalidCertificate(
                    "intermediate verification requested without an intermediate file".into(),
                )
            })?;
            for intermediate in X509::stack_from_pem(&std::fs::read(ca_inter)?)? {
                chain.push(intermediate)?;
            }
        }
        if self.mode.contains(CertVerify::CRL) {
            let crl_file = self.crl_file.as_ref().ok_or_else(|| {
                Error::InvalidCertificate("CRL verification requested without a CRL file".into())
            })?;
            store
                .add_lookup(X509Lookup::file())?
                .load_crl_file(crl_file, SslFiletype::PEM)?;
            store.set_flags(X509VerifyFlags::CRL_CHECK)?;
        }
        let store = store.build();

        let mut context = X509StoreContext::new()?;
        let verified = context.init(&store, &leaf, &chain, |context| {
            if context.verify_cert()? {
                Ok(Ok(()))
            } else {
                Ok(Err(context.error()))
            }
        })?;
        match verified {
            Ok(()) => {
                tracing::debug!(subject = ?leaf.subject_name(), "Certificate chain verified");
                Ok(leaf)
            }
            Err(result) => Err(Error::InvalidCertificate(result.error_string().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::certs_dir;

    fn leaf() -> Vec<u8> {
        std::fs::read(certs_dir().join("cert.pem")).unwrap()
    }

    #[test]
    fn no_checks_accepts_anything_parseable() {
        let verifier = CertVerifier::default();
        verifier.verify(&leaf()).unwrap();
        assert!(verifier.verify(b"not a certificate").is_err());
    }

    #[test]
    fn validity_period() {
        let verifier = CertVerifier {
            mode: CertVerify::TIME,
            ..Default::default()
        };
        verifier.verify(&leaf()).unwrap();
    }

    #[test]
    fn chain_to_ca_file() {
        let verifier = CertVerifier {
            mode: CertVerify::TIME | CertVerify::CA_FILE,
            ca_file: Some(certs_dir().join("ca.pem")),
            ..Default::default()
        };
        verifier.verify(&leaf()).unwrap();
    }

    #[test]
    fn untrusted_chain() {
        // The leaf isn't its own issuer, so trusting only itself must fail.
        let verifier = CertVerifier {
            mode: CertVerify::CA_FILE,
            ca_file: Some(certs_dir().join("cert.pem")),
            ..Default::default()
        };
        let result = verifier.verify(&leaf());
        assert!(matches!(result, Err(Error::InvalidCertificate(_))));
    }

    #[test]
    fn crl_check() {
        let verifier = CertVerifier {
            mode: CertVerify::CA_FILE | CertVerify::CRL,
            ca_file: Some(certs_dir().join("ca.pem")),
            crl_file: Some(certs_dir().join("crl.pem")),
            ..Default::default()
        };
        verifier.verify(&leaf()).unwrap();
    }

    #[test]
    fn missing_ca_file() {
        let verifier = CertVerifier {
            mode: CertVerify::CA_FILE,
            ..Default::default()
        };
        assert!(matches!(
            verifier.verify(&leaf()),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn bitmask() {
        let mode = CertVerify::from(5);
        assert!(mode.contains(CertVerify::TIME));
        assert!(mode.contains(CertVerify::CA_FILE));
        assert!(!mode.contains(CertVerify::CRL));
        assert!(mode.needs_chain());
        assert!(!CertVerify::TIME.needs_chain());
    }
}
