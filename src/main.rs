//! cyflash - bootloader host for .cyacd firmware images
//!
//! Programs devices running a Cypress-style bootloader over USB or a
//! serial port. Every device command runs one session:
//!
//! - find the device, retrying until it enumerates
//! - enter the bootloader and check the silicon identity
//! - do the work (program, erase, query)
//! - always send ExitBootloader so the device starts its application

mod cli;
mod commands;
mod link;

use clap::Parser;
use cli::{Cli, Commands};
use cyflash_core::Config;
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG still takes precedence over -v
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose).as_str()),
    )
    .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(link) = cli.command.link() {
        log::debug!("Using {:?} link", link.mode);
    }

    let result = match &cli.command {
        Commands::Program {
            link,
            image,
            restart,
        } => commands::run_program(link, &config, image, *restart),
        Commands::Restart { link } => commands::run_restart(link, &config),
        Commands::Info { link, array } => commands::run_info(link, &config, array),
        Commands::Erase { link, array } => commands::run_erase(link, &config, *array),
        Commands::Verify { link } => commands::run_verify(link, &config),
        Commands::Parse { image } => commands::run_parse(image),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Default log filter for a `-v` count
fn log_filter(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Load the configuration file, or the built-in defaults when none is given
fn load_config(path: Option<&Path>) -> cyflash_core::Result<Config> {
    match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            Config::from_file(path)
        }
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_follows_verbosity() {
        assert_eq!(log_filter(0), log::LevelFilter::Info);
        assert_eq!(log_filter(1), log::LevelFilter::Debug);
        assert_eq!(log_filter(2), log::LevelFilter::Trace);
        assert_eq!(log_filter(5), log::LevelFilter::Trace);
    }

    #[test]
    fn test_verbose_filter_enables_debug() {
        let logger = env_logger::Builder::new()
            .parse_filters(log_filter(1).as_str())
            .build();
        let debug = log::Metadata::builder()
            .level(log::Level::Debug)
            .target("cyflash_core::session")
            .build();
        let trace = log::Metadata::builder()
            .level(log::Level::Trace)
            .target("cyflash_core::session")
            .build();
        assert!(log::Log::enabled(&logger, &debug));
        assert!(!log::Log::enabled(&logger, &trace));

        let logger = env_logger::Builder::new()
            .parse_filters(log_filter(2).as_str())
            .build();
        assert!(log::Log::enabled(&logger, &trace));
    }
}
