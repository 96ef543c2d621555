// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - realtime direct-messaging core.
//!
//! This is the binary entry point: it loads configuration and runs the
//! gateway, or validates configuration and mints connection tokens.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::ParleyConfig;
use parley_core::ParleyError;
use parley_gateway::HmacTokenResolver;

/// Parley - realtime direct-messaging core.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway.
    Serve,
    /// Validate configuration and report every problem found.
    CheckConfig,
    /// Print a connection token for a user, signed with the configured secret.
    Token {
        /// The user the token identifies.
        user_id: i64,
    },
}

fn load_config(path: Option<&std::path::Path>) -> ParleyConfig {
    let loaded = match path {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

fn issue_token(config: &ParleyConfig, user_id: i64) -> Result<String, ParleyError> {
    HmacTokenResolver::new(config.auth.token_secret.as_deref()).issue(user_id)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::CheckConfig => {
            println!(
                "parley: config ok (listen={}:{}, database={})",
                config.server.host, config.server.port, config.storage.database_path
            );
            Ok(())
        }
        Commands::Token { user_id } => issue_token(&config, user_id).map(|token| println!("{token}")),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the stats epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["parley", "token", "42", "--config", "p.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Token { user_id: 42 }));
        assert_eq!(cli.config, Some(PathBuf::from("p.toml")));
        assert!(Cli::try_parse_from(["parley"]).is_err());
    }

    #[test]
    fn token_requires_a_secret() {
        let mut config = parley_config::load_and_validate_str("").unwrap();
        assert!(issue_token(&config, 7).is_err());

        config.auth.token_secret = Some("s3cret".into());
        let token = issue_token(&config, 7).unwrap();
        assert!(token.starts_with("7."));
    }
}
