//! paywatch binary entry point.

use std::process::ExitCode;

use clap::Parser;

use paywatch::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    ExitCode::from(paywatch::cli::run(cli).await)
}
