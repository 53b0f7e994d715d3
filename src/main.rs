#![doc = include_str!("../README.md")]

mod cmd;

use {
    crate::cmd::MainCmd,
    anyhow::{Context, Result},
    tracing_subscriber::EnvFilter,
};

fn main() -> Result<()> {
    // Diagnostics go to stderr, `RUST_LOG` overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cmd: MainCmd = argh::from_env();
    cmd.run().context("failed to run subcommand")
}
