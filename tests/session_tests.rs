use std::fs;

use tensilelink::{SessionBuffer, SessionError, TelemetrySample};

fn sample(timestamp: f64, current: f64, peak: f64) -> TelemetrySample {
    TelemetrySample {
        timestamp,
        current,
        peak,
    }
}

#[test]
fn test_buffer_accumulates_and_tracks_peak() {
    let mut buffer = SessionBuffer::new();
    assert!(buffer.is_empty());
    assert_eq!(buffer.current_peak(), 0.0);

    buffer.push(sample(0.1, 0.5, 0.5));
    buffer.push(sample(0.2, 1.2, 1.2));
    buffer.push(sample(0.3, 0.9, 1.2));

    assert_eq!(buffer.len(), 3);
    // Peak tracks the device's running maximum, i.e. the last sample.
    assert_eq!(buffer.current_peak(), 1.2);
}

#[test]
fn test_discard_empties_the_buffer() {
    let mut buffer = SessionBuffer::new();
    buffer.push(sample(0.1, 0.5, 0.5));
    buffer.discard();
    assert!(buffer.is_empty());
    assert_eq!(buffer.current_peak(), 0.0);
}

#[test]
fn test_save_writes_three_decimal_csv_and_clears() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = SessionBuffer::new();
    buffer.push(sample(0.1, 0.5, 0.5));
    buffer.push(sample(0.25, 1.23456, 1.23456));

    let path = buffer
        .save_to_dir(dir.path(), Some("pull.csv"))
        .unwrap();
    assert_eq!(path, dir.path().join("pull.csv"));

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(
        contents,
        "timestamp_s,current_kN,peak_kN\n0.100,0.500,0.500\n0.250,1.235,1.235\n"
    );

    // A successful save starts a fresh session.
    assert!(buffer.is_empty());
}

#[test]
fn test_save_generates_timestamped_filename() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = SessionBuffer::new();
    buffer.push(sample(0.1, 0.5, 0.5));

    let path = buffer.save_to_dir(dir.path(), None).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("test_"), "unexpected name {name}");
    assert!(name.ends_with(".csv"));
}

#[test]
fn test_saving_empty_buffer_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = SessionBuffer::new();
    let result = buffer.save_to_dir(dir.path(), None);
    assert!(matches!(result, Err(SessionError::Empty)));
}
