// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

#![doc = include_str!("../README.md")]

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod resolver;
pub mod selftest;
mod service;
pub mod tls;

pub use service::{listen, router, AppState};
