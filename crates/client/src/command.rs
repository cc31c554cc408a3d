// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line front end: one subcommand per pipeline operation.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::client::{ApiClient, RequestOptions};
use crate::config::ClientConfig;
use crate::session::Session;

#[derive(Debug, clap::Parser)]
#[command(name = "consoleapi", version, about = "Authenticated client for the admin console API")]
pub struct Cli {
    #[command(flatten)]
    pub config: ClientConfig,

    /// Log filter directive; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info", env = "CONSOLE_API_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: `text` or `json`.
    #[arg(long, default_value = "text", env = "CONSOLE_API_LOG_FORMAT")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in and store the issued credentials.
    Login {
        #[arg(long, env = "CONSOLE_API_USERNAME")]
        username: String,
        #[arg(long, env = "CONSOLE_API_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and clear stored credentials.
    Logout,
    /// Show which credentials are stored.
    Status,
    /// Bootstrap and print the anti-forgery token.
    Csrf,
    Get(RequestArgs),
    Post(RequestArgs),
    Put(RequestArgs),
    Patch(RequestArgs),
    Delete(RequestArgs),
}

#[derive(Debug, clap::Args)]
pub struct RequestArgs {
    /// Request path, relative to the base URL.
    pub path: String,

    /// JSON request body.
    #[arg(long)]
    pub body: Option<String>,

    /// Query parameter as `key=value`. Repeatable.
    #[arg(long = "query", short = 'q', value_parser = parse_pair)]
    pub query: Vec<(String, String)>,

    /// Extra header as `name=value`. Repeatable.
    #[arg(long = "header", short = 'H', value_parser = parse_pair)]
    pub headers: Vec<(String, String)>,
}

impl RequestArgs {
    fn body(&self) -> anyhow::Result<Option<Value>> {
        match self.body {
            Some(ref raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn options(&self) -> RequestOptions {
        RequestOptions { query: self.query.clone(), headers: self.headers.clone() }
    }
}

/// Parse `key=value`.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// Install the stderr log subscriber. Later calls are no-ops.
pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Run one CLI command against a session with durable credential storage.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let session = Session::with_file_store(cli.config)?;
    spawn_navigation_logger(&session);
    let client = ApiClient::new(Arc::clone(&session));

    let output = execute(&client, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Execute a command and return its JSON output.
pub async fn execute(client: &ApiClient, command: Command) -> anyhow::Result<Value> {
    let (method, args) = match command {
        Command::Login { username, password } => {
            let status = client.login(&username, &password).await?;
            return Ok(serde_json::to_value(status)?);
        }
        Command::Logout => {
            client.logout().await;
            return Ok(serde_json::json!({ "logged_out": true }));
        }
        Command::Status => {
            return Ok(serde_json::to_value(client.session().credentials().status())?);
        }
        Command::Csrf => {
            let token = client.session().anti_forgery().bootstrap().await;
            return Ok(serde_json::to_value(token)?);
        }
        Command::Get(args) => (Method::GET, args),
        Command::Post(args) => (Method::POST, args),
        Command::Put(args) => (Method::PUT, args),
        Command::Patch(args) => (Method::PATCH, args),
        Command::Delete(args) => (Method::DELETE, args),
    };
    let body = args.body()?;
    let data = client.send(method, &args.path, body, &args.options()).await?;
    Ok(data)
}

/// Log navigation signals; the CLI has no views to switch to.
fn spawn_navigation_logger(session: &Session) {
    let mut rx = session.subscribe_navigation();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(nav) => tracing::warn!(?nav, "session requires user action"),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
