//! CLI command implementations
//!
//! Each command opens its own session; sessions end with the bootloader
//! exited and the link closed, so commands never share a transport.

mod device;
mod parse;
mod program;

pub use device::{run_erase, run_info, run_restart, run_verify};
pub use parse::run_parse;
pub use program::run_program;
