use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_BAUD_RATE: u32 = 115_200;
const RECENT_TECHNICIANS_CAP: usize = 8;

/// Tuning knobs for the device link.
///
/// The handshake delays are timing-sensitive: the firmware emits boot and
/// calibration text for about three seconds after the port opens, and each
/// mode change is followed by menu text that must settle before the input
/// buffer is discarded. Shortening them risks racing the device's own
/// output.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Upper bound on a single blocking read; also the latency with which
    /// the reader thread notices a stop request.
    pub read_timeout: Duration,
    /// Wait after opening the port before touching the device at all.
    pub boot_settle_delay: Duration,
    /// Wait after sending the JSON-mode command.
    pub mode_switch_delay: Duration,
    /// Wait after the forced pause that ends the handshake.
    pub pause_confirm_delay: Duration,
    /// Wait after each single-byte command sent by the business operations.
    pub command_settle_delay: Duration,
    /// How long `disconnect` waits for the reader thread before detaching it
    /// and closing the port anyway.
    pub join_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(1),
            boot_settle_delay: Duration::from_secs(3),
            mode_switch_delay: Duration::from_millis(800),
            pause_confirm_delay: Duration::from_millis(500),
            command_settle_delay: Duration::from_millis(250),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Operator preferences persisted between runs as a JSON file.
///
/// Missing keys fall back to their defaults and unknown keys are ignored,
/// so the file survives upgrades in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_export_directory")]
    pub export_directory: PathBuf,
    #[serde(default = "default_tests_directory")]
    pub tests_directory: PathBuf,
    #[serde(default)]
    pub last_port: String,
    #[serde(default)]
    pub last_technician: String,
    #[serde(default)]
    pub recent_technicians: Vec<String>,
    #[serde(default)]
    pub company_name: String,
}

fn default_export_directory() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_tests_directory() -> PathBuf {
    PathBuf::from("./Tests")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            export_directory: default_export_directory(),
            tests_directory: default_tests_directory(),
            last_port: String::new(),
            last_technician: String::new(),
            recent_technicians: Vec::new(),
            company_name: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file is
    /// absent or unreadable. A corrupt file is logged and ignored rather
    /// than aborting startup.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!("settings file {} is corrupt: {err}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                warn!("could not read settings {}: {err}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write settings to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
    }

    /// Record `name` as the most recent technician, deduplicating and
    /// keeping the history bounded.
    pub fn remember_technician(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.recent_technicians.retain(|t| t != name);
        self.recent_technicians.insert(0, name.to_string());
        self.recent_technicians.truncate(RECENT_TECHNICIANS_CAP);
        self.last_technician = name.to_string();
    }

    pub fn restore_defaults(&mut self) {
        *self = Self::default();
    }
}
