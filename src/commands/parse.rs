//! Offline image summary

use cyflash_core::FirmwareImage;
use std::path::Path;

/// Print what an image contains
pub fn run_parse(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = FirmwareImage::from_file(path)?;

    println!("Image:            {}", path.display());
    println!("Silicon ID:       0x{:08X}", image.silicon_id());
    println!("Silicon revision: 0x{:02X}", image.silicon_rev());
    println!("Rows:             {}", image.rows().len());
    for (array_id, rows) in image.rows_per_array() {
        println!("  array {}:        {} rows", array_id, rows);
    }
    println!("Payload:          {} bytes", image.total_bytes());

    if let (Some(first), Some(last)) = (image.rows().first(), image.rows().last()) {
        println!(
            "Row range:        {}:{} .. {}:{}",
            first.array_id(),
            first.row_num(),
            last.array_id(),
            last.row_num()
        );
    }
    Ok(())
}
