#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::io;

use blockindex::{IndexConfig, Session, Shell};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Logs go to stderr so they never interleave with command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockindex=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = match IndexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: durability={:?}, overwrite={:?}",
        config.durability,
        config.overwrite
    );

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let mut shell = Shell::new(Session::new(config), stdin, stdout);

    if let Err(e) = shell.run() {
        tracing::error!("Shell terminated: {e}");
        std::process::exit(1);
    }
}
