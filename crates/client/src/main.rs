// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use consoleapi::command::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    consoleapi::command::init_tracing(&cli);

    if let Err(e) = consoleapi::command::run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
