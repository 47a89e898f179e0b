//! Man page generator for cyflash
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::PathBuf;

#[path = "../cli.rs"]
#[allow(dead_code)]
mod cli;

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let man = clap_mangen::Man::new(cmd.clone());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;

    let output_path = output_dir.join("cyflash.1");
    fs::write(&output_path, buffer)?;
    println!("Man page generated at: {}", output_path.display());

    // One page per subcommand, named the way man(1) looks them up
    for sub in cmd.get_subcommands() {
        let name = format!("cyflash-{}", sub.get_name());
        let page = clap_mangen::Man::new(sub.clone().name(name.clone()));
        let mut buffer = Vec::new();
        page.render(&mut buffer)?;
        let path = output_dir.join(format!("{}.1", name));
        fs::write(&path, buffer)?;
        println!("Man page generated at: {}", path.display());
    }

    println!("\nTo view the man page:");
    println!("  man -l {}", output_path.display());

    Ok(())
}
