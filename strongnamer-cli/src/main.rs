mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Library logs go to stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("strongnamer", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Sign(args) => commands::sign::run(args, &cli.global),
        Command::Info { path, key } => commands::info::run(path, key.as_deref(), &cli.global),
        Command::Token { key } => commands::token::run(key, &cli.global),
        Command::Clean { output_dir } => commands::clean::run(output_dir, &cli.global),
    }
}
