//! Program command implementation

use cyflash_core::{Config, FirmwareImage, ProgramProgress, Row, Session};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::cli::LinkArgs;
use crate::link;

/// Progress reporter using an indicatif progress bar
struct IndicatifProgress {
    bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ProgramProgress for IndicatifProgress {
    fn start(&mut self, total_rows: usize) {
        let pb = ProgressBar::new(total_rows as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.bar = Some(pb);
    }

    fn row_programmed(&mut self, index: usize, row: &Row) {
        if let Some(pb) = &self.bar {
            pb.set_position(index as u64 + 1);
            pb.set_message(format!("array {} row {}", row.array_id(), row.row_num()));
        }
    }

    fn verifying(&mut self) {
        if let Some(pb) = &self.bar {
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message("Verifying application checksum...");
            pb.enable_steady_tick(Duration::from_millis(100));
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

/// Run the program command
pub fn run_program(
    link_args: &LinkArgs,
    config: &Config,
    image_path: &Path,
    restart_only: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = FirmwareImage::from_file(image_path)?;
    let options = link::session_options(link_args, config)?;
    let transport = link::open(link_args, config, Some(&image))?;
    let session = Session::new(transport, options);

    if restart_only {
        session.restart()?;
        println!("Device restarted");
        return Ok(());
    }

    println!(
        "Programming {} ({} rows, {} bytes) for silicon 0x{:08X} rev 0x{:02X}",
        image_path.display(),
        image.rows().len(),
        image.total_bytes(),
        image.silicon_id(),
        image.silicon_rev()
    );

    let mut progress = IndicatifProgress::new();
    let report = session.program(&image, &mut progress)?;

    println!(
        "Programmed {} rows in {:.2?}, application checksum 0x{:02X}",
        report.rows_programmed, report.elapsed, report.app_checksum
    );
    Ok(())
}
