//! maildeck binary entry point
//!
//! Thin wrapper: load `.env` overrides, parse the CLI, hand off to the
//! library, and exit with the code the command decided.

use clap::Parser;

use maildeck::cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let parsed = cli::Cli::parse();
    let code = cli::run(parsed).await;
    std::process::exit(code);
}
