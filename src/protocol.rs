use serde::{Deserialize, Serialize};

// Single-byte commands understood by TensileOS firmware. The device has no
// state query; every command is edge-triggered.

/// Switch the device to structured JSON output. Side effect: leaving the
/// menu also starts the device running.
pub const CMD_JSON_MODE: u8 = b'j';
/// Toggle pause/resume. Sent to a paused device this resets the onboard
/// peak and timestamp counters and begins a new measurement epoch.
pub const CMD_TOGGLE_PAUSE: u8 = b'x';
/// Resume measurement from a known paused state. Distinct from the toggle
/// so an already-running device is never accidentally paused.
pub const CMD_RESUME: u8 = b'r';
/// Enter calibration mode. Reserved; current firmware does not implement it.
pub const CMD_CALIBRATE: u8 = b'c';

/// One decoded reading from the rig: seconds since the measurement epoch,
/// instantaneous force, and the running peak, both in kN.
///
/// The firmware omits fields it has not populated yet, so every field
/// defaults to zero instead of failing the whole line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub peak: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("line is not telemetry")]
    NotTelemetry,
    #[error("invalid telemetry JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Telemetry lines start with `{`; everything else the device emits
/// (boot text, calibration readout, menu prompts) is free text.
pub fn is_telemetry(line: &str) -> bool {
    line.starts_with('{')
}

/// Decode one telemetry line into a sample.
///
/// Lines that do not classify as telemetry are rejected up front so menu
/// text never reaches the JSON parser.
pub fn parse_sample(line: &str) -> Result<TelemetrySample, ProtocolError> {
    if !is_telemetry(line) {
        return Err(ProtocolError::NotTelemetry);
    }
    Ok(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sample_decodes_exactly() {
        let sample = parse_sample(r#"{"timestamp":1.5,"current":0.75,"peak":2.25}"#).unwrap();
        assert_eq!(sample.timestamp, 1.5);
        assert_eq!(sample.current, 0.75);
        assert_eq!(sample.peak, 2.25);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let sample = parse_sample(r#"{"current":3.2}"#).unwrap();
        assert_eq!(sample.timestamp, 0.0);
        assert_eq!(sample.current, 3.2);
        assert_eq!(sample.peak, 0.0);

        let sample = parse_sample("{}").unwrap();
        assert_eq!(sample.timestamp, 0.0);
        assert_eq!(sample.current, 0.0);
        assert_eq!(sample.peak, 0.0);
    }

    #[test]
    fn test_menu_text_is_not_telemetry() {
        assert!(!is_telemetry("Measurement Paused. Peak: 12.3 kN"));
        assert!(!is_telemetry("r) Resume measurement"));
        assert!(matches!(
            parse_sample("Starting new test..."),
            Err(ProtocolError::NotTelemetry)
        ));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let result = parse_sample(r#"{"timestamp":1.5,"current":"#);
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let sample =
            parse_sample(r#"{"timestamp":0.1,"current":0.2,"peak":0.3,"units":"kN"}"#).unwrap();
        assert_eq!(sample.peak, 0.3);
    }
}
