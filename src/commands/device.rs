//! Restart, info, erase and verify commands

use cyflash_core::{Config, Session, Transport};

use crate::cli::LinkArgs;
use crate::link;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn open_session(
    link_args: &LinkArgs,
    config: &Config,
) -> cyflash_core::Result<Session<Box<dyn Transport>>> {
    let options = link::session_options(link_args, config)?;
    let transport = link::open(link_args, config, None)?;
    Ok(Session::new(transport, options))
}

/// Send only ExitBootloader
pub fn run_restart(link_args: &LinkArgs, config: &Config) -> CmdResult {
    open_session(link_args, config)?.restart()?;
    println!("Device restarted");
    Ok(())
}

/// Print bootloader identity and flash bounds
pub fn run_info(link_args: &LinkArgs, config: &Config, arrays: &[u8]) -> CmdResult {
    let info = open_session(link_args, config)?.device_info(arrays)?;

    println!("Silicon ID:         0x{:08X}", info.bootloader.silicon_id);
    println!("Silicon revision:   0x{:02X}", info.bootloader.silicon_rev);
    println!("Bootloader version: {}", info.bootloader.version_string());
    for (array_id, bounds) in &info.arrays {
        println!(
            "Array {}:            rows {}..={} ({} rows)",
            array_id,
            bounds.start_row,
            bounds.end_row,
            bounds.row_count()
        );
    }
    Ok(())
}

/// Erase every row of one array
pub fn run_erase(link_args: &LinkArgs, config: &Config, array_id: u8) -> CmdResult {
    let erased = open_session(link_args, config)?.erase(array_id)?;
    println!("Erased {} rows of array {}", erased, array_id);
    Ok(())
}

/// Ask the device to check the application
pub fn run_verify(link_args: &LinkArgs, config: &Config) -> CmdResult {
    let value = open_session(link_args, config)?.verify_app()?;
    println!("Application checksum valid (0x{:02X})", value);
    Ok(())
}
