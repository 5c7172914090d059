//! Parley - conversation sessions and user memory
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use anyhow::Result;
use parley::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    parley::cli::run(cli).await
}
