//! CLI configuration and runtime setup.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

/// Distributed shopping-list store.
#[derive(Debug, Parser)]
#[command(name = "shoplist", version, about)]
pub struct CliConfig {
    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_new(&self.log)?)
            .init();
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.command.run())
    }
}
