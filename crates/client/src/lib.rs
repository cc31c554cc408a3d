// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consoleapi: authenticated request pipeline for the admin console backend.

pub mod client;
pub mod command;
pub mod config;
pub mod credential;
pub mod csrf;
pub mod envelope;
pub mod error;
pub mod refresh;
pub mod session;

use std::sync::Once;

pub use client::{ApiClient, RequestOptions};
pub use config::ClientConfig;
pub use error::{ApiError, ErrorKind};
pub use session::{Navigation, Session};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
