// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use clap::CommandFactory;

const TASKS: [&str; 2] = ["manual", "test-certs"];

fn main() -> anyhow::Result<()> {
    match env::args()
        .nth(1)
        .ok_or(anyhow!("Must provide a task"))?
        .as_str()
    {
        "manual" => generate_manual(),
        "test-certs" => generate_test_certs(),
        _ => Err(anyhow!("Unknown task, use one of {:?}", TASKS)),
    }
}

fn generate_manual() -> anyhow::Result<()> {
    let mut root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    root.push("../");

    let outdir = root.join("secsipidx/docs/");
    std::fs::create_dir_all(&outdir)?;
    let command = secsipidx::cli::Cli::command();
    let manual = clap_mangen::Man::new(command);
    manual.generate_to(outdir)?;

    Ok(())
}

fn openssl(outdir: &Path, args: &[&str]) -> anyhow::Result<()> {
    let output = std::process::Command::new("openssl")
        .current_dir(outdir)
        .args(args)
        .output()?;
    if !output.status.success() {
        anyhow::bail!(
            "openssl {} failed: {:?}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Regenerate the P-256 key pair, test CA, leaf certificate, and CRL in devel/certs.
fn generate_test_certs() -> anyhow::Result<()> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let outdir = root.join("../devel/certs");
    std::fs::create_dir_all(&outdir)?;
    println!("Generating test certificates in {}", outdir.display());

    openssl(
        &outdir,
        &["ecparam", "-name", "prime256v1", "-genkey", "-noout", "-out", "ec256-private.pem"],
    )?;
    openssl(
        &outdir,
        &["ec", "-in", "ec256-private.pem", "-pubout", "-out", "ec256-public.pem"],
    )?;
    openssl(
        &outdir,
        &["ecparam", "-name", "prime256v1", "-genkey", "-noout", "-out", "ca-private.pem"],
    )?;
    openssl(
        &outdir,
        &[
            "req", "-new", "-x509", "-key", "ca-private.pem", "-days", "36500", "-subj",
            "/CN=SHAKEN Test Root", "-out", "ca.pem",
        ],
    )?;
    openssl(
        &outdir,
        &[
            "req", "-new", "-key", "ec256-private.pem", "-subj", "/CN=SHAKEN 1234", "-out",
            "cert.csr",
        ],
    )?;
    openssl(
        &outdir,
        &[
            "x509", "-req", "-in", "cert.csr", "-CA", "ca.pem", "-CAkey", "ca-private.pem",
            "-CAcreateserial", "-days", "36500", "-out", "cert.pem",
        ],
    )?;

    // An empty CRL needs a minimal CA database.
    std::fs::write(outdir.join("index.txt"), "")?;
    std::fs::write(
        outdir.join("crl.cnf"),
        "[ca]\ndefault_ca = test\n[test]\ndatabase = index.txt\ndefault_md = sha256\ndefault_crl_days = 36500\n",
    )?;
    openssl(
        &outdir,
        &[
            "ca", "-config", "crl.cnf", "-gencrl", "-keyfile", "ca-private.pem", "-cert", "ca.pem",
            "-out", "crl.pem",
        ],
    )?;

    // Only the test material is kept; the CA key is not needed by the tests.
    for leftover in [
        "ca-private.pem",
        "cert.csr",
        "ca.srl",
        "index.txt",
        "index.txt.attr",
        "crl.cnf",
    ] {
        let _ = std::fs::remove_file(outdir.join(leftover));
    }

    Ok(())
}
