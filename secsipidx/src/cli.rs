// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{collections::HashSet, ffi::OsString};

use clap::{CommandFactory, Parser};

use crate::config::Config;

/// Sign and check SIP Identity headers (STIR/SHAKEN PASSporT tokens).
///
/// The tool runs in exactly one mode per invocation: print the version, run the local
/// self-test, serve the HTTP/HTTPS API, check an identity, build and sign a full identity,
/// or sign a header and payload. If an HTTP or HTTPS bind address is set, the service runs
/// and the one-shot modes are ignored.
///
/// Log configuration is provided using the "SECSIPIDX_LOG" environment variable with one or
/// more comma-separated directives. In short, filters can be plain verbosity levels ("trace",
/// "debug", "info", "warn", "error"), or more complex filtering at the span or event level.
/// If the variable is unset, the level is derived from `--verbosity`.
///
/// The complete format is documented at
/// https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives.
#[derive(Parser, Debug)]
#[command(name = "secsipidx", version, disable_version_flag = true)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,
}

impl Cli {
    /// Parse the process arguments, accepting single-dash long options.
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

/// Rewrite single-dash long options (`-http-srv :8080`, `-vl=2`) to their double-dash form.
///
/// Only names of known long options are rewritten, so option values and negative numbers
/// are passed through untouched. Everything after a bare `--` is left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let command = Cli::command();
    let mut long_names: HashSet<String> = command
        .get_arguments()
        .filter_map(|arg| arg.get_long_and_visible_aliases())
        .flatten()
        .map(str::to_string)
        .collect();
    long_names.insert("help".to_string());

    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(index, arg)| {
            if index == 0 || passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }
            match text.strip_prefix('-') {
                Some(rest) if !rest.starts_with('-') => {
                    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
                    if name.len() > 1 && long_names.contains(name) {
                        OsString::from(format!("-{text}"))
                    } else {
                        arg
                    }
                }
                _ => arg,
            }
        })
        .collect()
}
