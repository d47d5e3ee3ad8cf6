use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};

/// The clap command for CLI argument parsing.
pub fn app() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand(
            Command::new("start")
                .alias("run")
                .about("Start warhost and host the configured game (default)"),
        )
        .subcommand(
            Command::new("config")
                .alias("cfg")
                .about("Config actions")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("generate").alias("gen").about("Generate config"))
                .subcommand(Command::new("test").about("Test config")),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .alias("cfg")
                .long("config")
                .global(true)
                .value_name("FILE")
                .default_value(crate::config::CONFIG_FILE)
                .help("Use config file")
                .action(ArgAction::Set),
        )
}
