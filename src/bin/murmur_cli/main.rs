//! murmur-cli: command-line client for the murmur HTTP API.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod client;
mod handlers;
mod io;
mod print;

use clap::Parser;

use args::Cli;
use client::{CliError, Ctx};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = Ctx::new(&cli.server)?;
    handlers::handle(&ctx, cli.command).await
}
