use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use coverage_overlay::app::{self, AppConfig, Args};
use coverage_overlay::ConfigError;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match AppConfig::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            let kind = match err {
                ConfigError::MixedForms => ErrorKind::ArgumentConflict,
                _ => ErrorKind::MissingRequiredArgument,
            };
            Args::command().error(kind, err).exit()
        }
    };

    app::init_tracing(config.verbose, config.format);
    let outcome = app::run(&config)?;
    app::print_summary(&outcome, config.format)
}
