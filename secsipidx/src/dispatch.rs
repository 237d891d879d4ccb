// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Select the run mode and map its outcome to the process exit status.

use std::sync::Arc;

use secsipid::Engine;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    resolver::{self, CheckRequest, ResolveError, SignRequest},
    selftest, service,
};

/// Exit status for invalid or missing input.
pub const EXIT_INPUT_ERROR: u8 = 255;
/// Exit status after printing the version, running the self-test, or stopping the service.
pub const EXIT_STOPPED: u8 = 1;

/// The single thing an invocation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Version,
    LocalTest,
    Serve,
    Check,
    SignFull,
    Sign,
    Help,
}

impl RunMode {
    /// Pick the mode; earlier rules win over later ones.
    pub fn select(config: &Config) -> Self {
        if config.version {
            Self::Version
        } else if config.ltest {
            Self::LocalTest
        } else if config.serves() {
            Self::Serve
        } else if config.check {
            Self::Check
        } else if config.sign_full {
            Self::SignFull
        } else if config.sign {
            Self::Sign
        } else {
            Self::Help
        }
    }
}

/// Exit status for an engine failure: the engine's status code, modulo 256.
fn engine_status(error: &secsipid::Error) -> u8 {
    error.code() as u8
}

fn program_name() -> String {
    std::env::args_os()
        .next()
        .as_deref()
        .map(std::path::Path::new)
        .and_then(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

/// Run the selected mode to completion and return the process exit status.
pub async fn run(config: Config, halt_token: CancellationToken) -> u8 {
    let mode = RunMode::select(&config);
    tracing::debug!(?mode, "Selected run mode");

    match mode {
        RunMode::Version => {
            println!("{} v{}", program_name(), env!("CARGO_PKG_VERSION"));
            EXIT_STOPPED
        }
        RunMode::LocalTest => {
            if let Err(error) = selftest::run(config.expire, &mut std::io::stdout()) {
                println!("error: {error}");
            }
            EXIT_STOPPED
        }
        RunMode::Help => {
            println!("{} v{}", program_name(), env!("CARGO_PKG_VERSION"));
            println!("Run with --help to list the available options.");
            0
        }
        RunMode::Serve | RunMode::Check | RunMode::SignFull | RunMode::Sign => {
            let engine = match Engine::new(config.engine_options()) {
                Ok(engine) => Arc::new(engine),
                Err(error) => {
                    tracing::error!(%error, "Failed to set up the identity engine");
                    println!("error: {error}");
                    return engine_status(&error);
                }
            };

            match mode {
                RunMode::Serve => {
                    if let Err(error) = service::listen(Arc::new(config), engine, halt_token).await
                    {
                        tracing::error!(error = format!("{error:#}"), "Service stopped");
                    }
                    EXIT_STOPPED
                }
                RunMode::Check => check(&config, &engine).await,
                RunMode::SignFull => sign_full(&config, &engine),
                _ => sign(&config, &engine),
            }
        }
    }
}

fn input_error(error: ResolveError) -> u8 {
    println!("error: {error}");
    EXIT_INPUT_ERROR
}

async fn check(config: &Config, engine: &Engine) -> u8 {
    tracing::info!("Running with check command");
    let request = match CheckRequest::resolve(config) {
        Ok(request) => request,
        Err(error) => {
            let status = input_error(error);
            println!("not-ok");
            return status;
        }
    };
    match request.check(engine).await {
        Ok(_payload) => {
            println!("ok");
            0
        }
        Err(error) => {
            println!("error: {error}");
            println!("not-ok");
            engine_status(&error)
        }
    }
}

fn sign_full(config: &Config, engine: &Engine) -> u8 {
    tracing::info!("Running with sign-full command");
    let Some(private_key) = crate::config::non_empty(&config.fprvkey) else {
        return input_error(ResolveError::MissingPrivateKey);
    };
    match engine.get_identity(&resolver::identity_fields(config), private_key) {
        Ok(identity) => {
            println!("{identity}");
            0
        }
        Err(error) => {
            println!("error: {error}");
            engine_status(&error)
        }
    }
}

fn sign(config: &Config, engine: &Engine) -> u8 {
    tracing::info!("Running with sign command");
    let request = match SignRequest::resolve(config) {
        Ok(request) => request,
        Err(error) => return input_error(error),
    };
    match request.sign(engine) {
        Ok(token) => {
            println!("{token}");
            0
        }
        Err(error) => {
            println!("error: {error}");
            engine_status(&error)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn empty_is_help() {
        assert_eq!(RunMode::select(&Config::default()), RunMode::Help);
    }

    #[test]
    fn version_wins() {
        let config = Config {
            version: true,
            ltest: true,
            http_srv: Some(":8080".into()),
            sign: true,
            ..Default::default()
        };
        assert_eq!(RunMode::select(&config), RunMode::Version);
    }

    #[test]
    fn serving_overrides_one_shot_modes() {
        let config = Config {
            http_srv: Some(":8080".into()),
            check: true,
            sign_full: true,
            sign: true,
            ..Default::default()
        };
        assert_eq!(RunMode::select(&config), RunMode::Serve);

        let config = Config {
            https_srv: Some(":8443".into()),
            https_pubkey: Some(PathBuf::from("cert.pem")),
            https_prvkey: Some(PathBuf::from("key.pem")),
            sign: true,
            ..Default::default()
        };
        assert_eq!(RunMode::select(&config), RunMode::Serve);
    }

    #[test]
    fn incomplete_https_does_not_serve() {
        let config = Config {
            https_srv: Some(":8443".into()),
            sign: true,
            ..Default::default()
        };
        assert_eq!(RunMode::select(&config), RunMode::Sign);
    }

    #[test]
    fn one_shot_order() {
        let mut config = Config {
            check: true,
            sign_full: true,
            sign: true,
            ..Default::default()
        };
        assert_eq!(RunMode::select(&config), RunMode::Check);
        config.check = false;
        assert_eq!(RunMode::select(&config), RunMode::SignFull);
        config.sign_full = false;
        assert_eq!(RunMode::select(&config), RunMode::Sign);
        config.ltest = true;
        assert_eq!(RunMode::select(&config), RunMode::LocalTest);
    }

    #[test]
    fn engine_codes_wrap() {
        assert_eq!(engine_status(&secsipid::Error::MissingKey), (-161_i32) as u8);
        assert_eq!(engine_status(&secsipid::Error::InvalidSignature), 126);
    }

    #[tokio::test]
    async fn sign_without_key_is_input_error() {
        let config = Config {
            sign: true,
            ..Default::default()
        };
        assert_eq!(run(config, CancellationToken::new()).await, EXIT_INPUT_ERROR);
    }

    #[tokio::test]
    async fn check_without_identity_is_input_error() {
        let config = Config {
            check: true,
            ..Default::default()
        };
        assert_eq!(run(config, CancellationToken::new()).await, EXIT_INPUT_ERROR);
    }
}
