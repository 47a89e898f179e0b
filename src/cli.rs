//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use cyflash_core::protocol::BootloaderKey;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u8
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u8>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a 12-hex-digit bootloader key
fn parse_key(s: &str) -> Result<BootloaderKey, String> {
    s.parse::<BootloaderKey>().map_err(|e| e.to_string())
}

/// How to reach the bootloader
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// USB device selected by serial number
    #[cfg(feature = "usb")]
    Usb,
    /// Serial port selected by path
    #[cfg(feature = "serial")]
    Serial,
    /// In-memory emulated bootloader
    #[cfg(feature = "dummy")]
    Dummy,
}

#[derive(Parser)]
#[command(name = "cyflash")]
#[command(author, version, about = "Bootloader host for .cyacd firmware images", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Link options shared by every command that talks to a device
#[derive(clap::Args, Debug, Clone)]
pub struct LinkArgs {
    /// Communication mode
    #[arg(short, long, value_enum)]
    pub mode: Mode,

    /// USB serial number of the device (usb mode)
    #[arg(short, long)]
    pub serial: Option<String>,

    /// Serial port path, e.g. /dev/ttyACM0 (serial mode)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Bootloader key as 12 hex digits
    #[arg(short, long, value_parser = parse_key)]
    pub key: Option<BootloaderKey>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Program a .cyacd image and verify it
    Program {
        #[command(flatten)]
        link: LinkArgs,

        /// Firmware image (.cyacd)
        #[arg(short, long)]
        image: PathBuf,

        /// Only restart the device: send the exit command and nothing else
        #[arg(long)]
        restart: bool,
    },

    /// Leave the bootloader and start the application
    Restart {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Show bootloader identity and flash bounds
    Info {
        #[command(flatten)]
        link: LinkArgs,

        /// Flash arrays to query (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u8, default_value = "0")]
        array: Vec<u8>,
    },

    /// Erase every row of a flash array
    Erase {
        #[command(flatten)]
        link: LinkArgs,

        /// Flash array to erase (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u8)]
        array: u8,
    },

    /// Ask the device to verify the application checksum
    Verify {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Summarize a .cyacd image without touching a device
    Parse {
        /// Firmware image (.cyacd)
        #[arg(short, long)]
        image: PathBuf,
    },
}

impl Commands {
    /// Link options of commands that open a device
    pub fn link(&self) -> Option<&LinkArgs> {
        match self {
            Commands::Program { link, .. }
            | Commands::Restart { link }
            | Commands::Info { link, .. }
            | Commands::Erase { link, .. }
            | Commands::Verify { link } => Some(link),
            Commands::Parse { .. } => None,
        }
    }
}
