//! Programming progress callbacks

use crate::image::Row;

/// Progress callback for [`Session::program`](super::Session::program)
pub trait ProgramProgress {
    /// Called once the device is verified, before the first row
    fn start(&mut self, total_rows: usize);

    /// Called after a row is programmed and its checksum confirmed
    fn row_programmed(&mut self, index: usize, row: &Row);

    /// Called before the application checksum is requested
    fn verifying(&mut self);

    /// Called when the session ends, on success or failure
    fn finish(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl ProgramProgress for NoProgress {
    fn start(&mut self, _total_rows: usize) {}
    fn row_programmed(&mut self, _index: usize, _row: &Row) {}
    fn verifying(&mut self) {}
    fn finish(&mut self) {}
}

/// Logs programming progress in 10 % steps
#[derive(Debug, Default)]
pub(crate) struct ProgressLog {
    total: usize,
    last_decile: usize,
}

impl ProgressLog {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            last_decile: 0,
        }
    }

    /// Record `done` rows, returning the percentage when a new step is crossed
    pub(crate) fn update(&mut self, done: usize) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let decile = done * 10 / self.total;
        if decile > self.last_decile {
            self.last_decile = decile;
            let percent = decile * 10;
            log::info!("programmed {}/{} rows ({}%)", done, self.total, percent);
            Some(percent)
        } else {
            None
        }
    }
}
