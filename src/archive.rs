use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::TelemetrySample;
use crate::session::CSV_HEADER;

const DATE_FOLDER_FORMAT: &str = "%Y-%m-%d";
const HEADER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_FILENAME_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("test file not found: {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Operator-supplied annotations written into a test file's header block.
#[derive(Debug, Clone, Default)]
pub struct TestMetadata {
    pub test_name: String,
    /// Header datetime, `YYYY-MM-DD HH:MM:SS`. Filled with the current time
    /// when empty.
    pub datetime: String,
    pub technician: String,
    pub notes: String,
    pub project: Option<String>,
}

/// Metadata of one archived test. Identity is the file path; the peak is
/// `None` when the header value does not parse, and statistics skip such
/// records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_name: String,
    pub datetime: String,
    pub technician: String,
    pub peak_force: Option<f64>,
    pub notes: String,
    pub project: Option<String>,
    pub filepath: PathBuf,
}

/// Date-partitioned on-disk store of saved tests.
///
/// Layout: `<root>/<YYYY-MM-DD>/<name>_<HHMMSS>.csv`, each file starting
/// with a `#`-comment metadata header followed by the CSV data rows.
pub struct TestArchive {
    root: PathBuf,
}

impl TestArchive {
    /// Open (and create if missing) an archive rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate the path for a new test saved at `when`, creating the date
    /// folder as needed.
    pub fn test_path_for(
        &self,
        test_name: &str,
        when: DateTime<Local>,
    ) -> io::Result<PathBuf> {
        let folder = self.root.join(when.format(DATE_FOLDER_FORMAT).to_string());
        fs::create_dir_all(&folder)?;
        let filename = format!(
            "{}_{}.csv",
            sanitize_filename(test_name),
            when.format("%H%M%S")
        );
        Ok(folder.join(filename))
    }

    /// Write a finalized test to `filepath`: metadata header, then the data
    /// rows. The recorded peak force is the last sample's running peak.
    pub fn save_test(
        &self,
        filepath: &Path,
        metadata: &TestMetadata,
        samples: &[TelemetrySample],
    ) -> Result<(), ArchiveError> {
        let peak_force = samples.last().map_or(0.0, |sample| sample.peak);

        let file = fs::File::create(filepath)?;
        let mut out = BufWriter::new(file);

        let datetime = if metadata.datetime.is_empty() {
            Local::now().format(HEADER_DATETIME_FORMAT).to_string()
        } else {
            metadata.datetime.clone()
        };
        write_header(
            &mut out,
            &metadata.test_name,
            &datetime,
            &metadata.technician,
            peak_force,
            metadata.project.as_deref(),
            &metadata.notes,
        )?;

        writeln!(out, "{CSV_HEADER}")?;
        for sample in samples {
            writeln!(
                out,
                "{:.3},{:.3},{:.3}",
                sample.timestamp, sample.current, sample.peak
            )?;
        }
        out.flush()?;
        Ok(())
    }

    /// Parse the `#`-comment header of an archived test. The ` kN` suffix is
    /// stripped from the peak before parsing; a peak that still fails to
    /// parse is kept as `None` rather than rejecting the record.
    pub fn read_metadata(&self, filepath: &Path) -> Result<TestRecord, ArchiveError> {
        if !filepath.exists() {
            return Err(ArchiveError::NotFound(filepath.to_path_buf()));
        }

        let contents = fs::read_to_string(filepath)?;
        let mut record = TestRecord {
            test_name: String::new(),
            datetime: String::new(),
            technician: String::new(),
            peak_force: None,
            notes: String::new(),
            project: None,
            filepath: filepath.to_path_buf(),
        };
        let mut notes_lines: Vec<&str> = Vec::new();

        for line in contents.lines() {
            let line = line.trim();
            if !line.starts_with('#') {
                break;
            }
            let content = line[1..].trim();
            if let Some(value) = content.strip_prefix("Test Name:") {
                record.test_name = value.trim().to_string();
            } else if let Some(value) = content.strip_prefix("Date:") {
                record.datetime = value.trim().to_string();
            } else if let Some(value) = content.strip_prefix("Technician:") {
                record.technician = value.trim().to_string();
            } else if let Some(value) = content.strip_prefix("Peak Force:") {
                let peak = value.trim().replace(" kN", "");
                record.peak_force = peak.trim().parse().ok();
            } else if let Some(value) = content.strip_prefix("Project:") {
                let value = value.trim();
                if !value.is_empty() {
                    record.project = Some(value.to_string());
                }
            } else if let Some(value) = content.strip_prefix("Notes:") {
                let value = value.trim();
                if !value.is_empty() {
                    notes_lines.push(value);
                }
            }
        }

        record.notes = notes_lines.join("\n");
        Ok(record)
    }

    /// Rewrite the header of an existing test from `record`, preserving the
    /// data rows byte-for-byte.
    pub fn update_metadata(&self, record: &TestRecord) -> Result<(), ArchiveError> {
        let filepath = &record.filepath;
        if !filepath.exists() {
            return Err(ArchiveError::NotFound(filepath.clone()));
        }

        let contents = fs::read_to_string(filepath)?;
        let data: Vec<&str> = contents
            .lines()
            .skip_while(|line| line.trim_start().starts_with('#'))
            .collect();

        let file = fs::File::create(filepath)?;
        let mut out = BufWriter::new(file);
        write_header(
            &mut out,
            &record.test_name,
            &record.datetime,
            &record.technician,
            record.peak_force.unwrap_or(0.0),
            record.project.as_deref(),
            &record.notes,
        )?;
        for line in data {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        Ok(())
    }

    /// All archived tests, newest date folder first, newest file first
    /// within a folder. Unreadable files are logged and skipped.
    pub fn list_all(&self) -> Vec<TestRecord> {
        let mut records = Vec::new();
        for folder in self.date_folders(true) {
            records.extend(self.records_in(&folder, true));
        }
        records
    }

    /// Tests saved on `date` (a `YYYY-MM-DD` folder name), oldest first.
    pub fn tests_on(&self, date: &str) -> Vec<TestRecord> {
        let folder = self.root.join(date);
        if !folder.is_dir() {
            return Vec::new();
        }
        self.records_in(&folder, false)
    }

    fn date_folders(&self, newest_first: bool) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect(),
            Err(err) => {
                warn!("cannot read archive root {}: {err}", self.root.display());
                return Vec::new();
            }
        };
        folders.sort();
        if newest_first {
            folders.reverse();
        }
        folders
    }

    fn records_in(&self, folder: &Path, newest_first: bool) -> Vec<TestRecord> {
        let mut files: Vec<PathBuf> = match fs::read_dir(folder) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
                .collect(),
            Err(err) => {
                warn!("cannot read archive folder {}: {err}", folder.display());
                return Vec::new();
            }
        };
        files.sort();
        if newest_first {
            files.reverse();
        }

        files
            .iter()
            .filter_map(|path| match self.read_metadata(path) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!("skipping unreadable test {}: {err}", path.display());
                    None
                }
            })
            .collect()
    }
}

fn write_header<W: Write>(
    out: &mut W,
    test_name: &str,
    datetime: &str,
    technician: &str,
    peak_force: f64,
    project: Option<&str>,
    notes: &str,
) -> io::Result<()> {
    writeln!(out, "# Test Name: {}", non_empty(test_name))?;
    writeln!(out, "# Date: {datetime}")?;
    writeln!(out, "# Technician: {}", non_empty(technician))?;
    writeln!(out, "# Peak Force: {peak_force:.3} kN")?;
    if let Some(project) = project {
        writeln!(out, "# Project: {project}")?;
    }
    let notes = notes.trim();
    if notes.is_empty() {
        writeln!(out, "# Notes: ")?;
    } else {
        for line in notes.lines() {
            writeln!(out, "# Notes: {line}")?;
        }
    }
    writeln!(out, "#")
}

fn non_empty(value: &str) -> &str {
    if value.trim().is_empty() {
        "Unknown"
    } else {
        value
    }
}

/// Make an operator-supplied test name safe to use as a filename: forbidden
/// characters become `_`, leading/trailing dots and spaces are stripped, the
/// length is capped, spaces become underscores, and a blank result falls
/// back to `"test"`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    let safe = capped.replace(' ', "_");
    if safe.is_empty() {
        "test".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_forbidden_characters() {
        assert_eq!(sanitize_filename("Weld <3> Test?"), "Weld__3__Test_");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn test_sanitize_trims_and_caps() {
        assert_eq!(sanitize_filename("  .name.  "), "name");
        let long = "x".repeat(150);
        assert_eq!(sanitize_filename(&long).chars().count(), 100);
    }

    #[test]
    fn test_sanitize_falls_back_on_empty() {
        assert_eq!(sanitize_filename(""), "test");
        assert_eq!(sanitize_filename(" . . "), "test");
    }
}
