use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::protocol::TelemetrySample;

/// Column header shared by session exports and archived test files.
pub const CSV_HEADER: &str = "timestamp_s,current_kN,peak_kN";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no data to save")]
    Empty,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Append-only buffer for the currently active test.
///
/// Consumes the device link's decoded telemetry; cleared on new-test start,
/// discard, or successful save. Samples are never mutated once buffered.
pub struct SessionBuffer {
    samples: Vec<TelemetrySample>,
    started_at: DateTime<Local>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            started_at: Local::now(),
        }
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Running peak of the active test, `0.0` before any data arrives.
    pub fn current_peak(&self) -> f64 {
        self.samples.last().map_or(0.0, |sample| sample.peak)
    }

    /// Wall-clock time the buffer was last cleared; used for generated
    /// export filenames.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Drop all buffered samples and restart the session clock.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.started_at = Local::now();
    }

    /// Discard the active test without saving.
    pub fn discard(&mut self) {
        self.clear();
    }

    /// Write the buffered samples as CSV with three-decimal fixed-point
    /// formatting.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "{CSV_HEADER}")?;
        for sample in &self.samples {
            writeln!(
                out,
                "{:.3},{:.3},{:.3}",
                sample.timestamp, sample.current, sample.peak
            )?;
        }
        Ok(())
    }

    /// Save the active test to `directory`, then clear the buffer.
    ///
    /// Without an explicit `filename` a timestamped `test_YYYYmmdd_HHMMSS.csv`
    /// name is generated from the session start time. Saving an empty buffer
    /// is an error.
    pub fn save_to_dir(
        &mut self,
        directory: &Path,
        filename: Option<&str>,
    ) -> Result<PathBuf, SessionError> {
        if self.is_empty() {
            return Err(SessionError::Empty);
        }

        fs::create_dir_all(directory)?;
        let filename = match filename {
            Some(name) => name.to_string(),
            None => format!("test_{}.csv", self.started_at.format("%Y%m%d_%H%M%S")),
        };
        let filepath = directory.join(filename);

        let file = File::create(&filepath)?;
        let mut writer = BufWriter::new(file);
        self.write_csv(&mut writer)?;
        writer.flush()?;

        self.clear();
        Ok(filepath)
    }
}

impl Default for SessionBuffer {
    fn default() -> Self {
        Self::new()
    }
}
