use std::fs;
use std::path::PathBuf;

use clap::ArgMatches;

use crate::config;
use crate::util::error::{quit_error, quit_error_msg, ErrorHints, ErrorHintsBuilder};

/// Invoke config generate command.
pub fn invoke(matches: &ArgMatches) -> Result<(), ()> {
    let path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(config::CONFIG_FILE),
    );

    // Do not overwrite an existing config
    if path.exists() {
        quit_error_msg(
            format!("Config file already exists: {}", path.to_string_lossy()),
            ErrorHintsBuilder::default().config(true).build().unwrap(),
        );
    }

    if let Err(err) = fs::write(&path, config::generate()) {
        quit_error(
            anyhow::anyhow!(err).context("Failed to write config file"),
            ErrorHints::default(),
        );
    }

    eprintln!("Config file generated: {}", path.to_string_lossy());
    eprintln!("Edit it and start with: warhost start");
    Ok(())
}
