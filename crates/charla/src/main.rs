// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Charla - multi-tenant messaging automation engine.
//!
//! This is the binary entry point for the Charla service.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod status;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Charla - multi-tenant messaging automation engine.
#[derive(Parser, Debug)]
#[command(name = "charla", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the automation engine.
    Serve,
    /// Show a tenant's session and quota status.
    Status {
        /// Tenant code to inspect.
        tenant_code: String,
    },
    /// Print the effective configuration.
    Config,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("charla={log_level},warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match charla_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            charla_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.service.log_level);

    let result = match cli.command {
        Some(Commands::Serve) => serve::run(config).await,
        Some(Commands::Status { tenant_code }) => status::run(config, &tenant_code).await,
        Some(Commands::Config) => {
            match toml::to_string_pretty(&config) {
                Ok(rendered) => {
                    println!("{rendered}");
                    Ok(())
                }
                Err(e) => Err(charla_core::CharlaError::Internal(format!(
                    "failed to render config: {e}"
                ))),
            }
        }
        None => {
            println!("charla: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("charla: {e}");
        std::process::exit(1);
    }
}
