// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! A basic local test of signing and verification with a built-in key pair.

use std::io::Write;

use secsipid::{passport, Header, Payload, SigningKey, VerifyingKey};

const PRIVATE_KEY: &[u8] = include_bytes!("../../devel/certs/ec256-private.pem");
const PUBLIC_KEY: &[u8] = include_bytes!("../../devel/certs/ec256-public.pem");

/// Sign a sample token, verify it, and sign the same documents as JSON text.
///
/// The token, the verified payload, and the text-signed token are written to `out`.
pub fn run(expire: u64, out: &mut impl Write) -> anyhow::Result<()> {
    let header = Header::shaken("https://certs.example.org/stir-shaken/cert01.pem");
    let payload = Payload::new(
        "A",
        "493044444444",
        0,
        "493055555555",
        "32c7e392-33fc-11ea-840b-784f435c76a8",
    );
    let signing_key = SigningKey::from_pem(PRIVATE_KEY)?;
    let verifying_key = VerifyingKey::from_pem(PUBLIC_KEY)?;

    let token = passport::encode(&header, &payload, &signing_key)?;
    writeln!(out, "Result: {token}")?;

    let verified = passport::decode(&token, expire, &verifying_key)?;
    writeln!(out, "Payload: {}", serde_json::to_string(&verified)?)?;

    let signature = passport::encode_text(
        &serde_json::to_string(&header)?,
        &serde_json::to_string(&payload)?,
        &signing_key,
    )?;
    writeln!(out, "Signature: {signature}")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_test_output() -> anyhow::Result<()> {
        let mut out = Vec::new();
        run(60, &mut out)?;
        let out = String::from_utf8(out)?;
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Result: eyJ"));
        assert!(lines[1].contains("\"orig\":{\"tn\":\"493055555555\"}"));
        assert!(lines[2].starts_with("Signature: eyJ"));
        // The header and payload segments are identical; ECDSA signatures are not.
        let token = lines[0].trim_start_matches("Result: ");
        let signature = lines[2].trim_start_matches("Signature: ");
        assert_eq!(
            token.rsplit_once('.').map(|(input, _)| input),
            signature.rsplit_once('.').map(|(input, _)| input)
        );
        Ok(())
    }
}
