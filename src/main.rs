#[macro_use]
extern crate log;

mod action;
mod ban;
mod cli;
mod command;
mod config;
mod connection;
mod discovery;
mod game;
mod host;
mod logfile;
mod net;
mod player;
mod proto;
mod service;
mod slot;
mod stats;
mod template;
mod util;

use std::env;
use std::process::exit;

fn main() {
    // Load the .env file if there is one
    let _ = dotenv::dotenv();

    init_log();

    let matches = cli::app().get_matches();

    let result = match matches.subcommand() {
        Some(("config", sub)) => match sub.subcommand() {
            Some(("generate", matches)) => action::config_generate::invoke(matches),
            Some(("test", matches)) => action::config_test::invoke(matches),
            _ => unreachable!("config subcommand is required"),
        },
        Some(("start", matches)) => action::start::invoke(matches),
        _ => action::start::invoke(&matches),
    };

    if result.is_err() {
        exit(1);
    }
}

/// Initialize the logger.
fn init_log() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    builder.init();
}
