use serde::{Deserialize, Serialize};

use crate::archive::TestRecord;

/// One test's distance from the batch mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDeviation {
    pub test_name: String,
    pub peak_force: f64,
    pub deviation: f64,
}

/// Complete statistical summary of a batch, in kN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub lower_3sigma: f64,
    pub upper_3sigma: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Batch statistics over the peak forces of archived tests.
///
/// Records without a parseable peak are excluded up front; `count` reflects
/// only the tests that contribute to the arithmetic.
pub struct BatchStatistics {
    peaks: Vec<(String, f64)>,
}

impl BatchStatistics {
    pub fn new(records: &[TestRecord]) -> Self {
        let peaks = records
            .iter()
            .filter_map(|record| {
                record
                    .peak_force
                    .map(|peak| (record.test_name.clone(), peak))
            })
            .collect();
        Self { peaks }
    }

    /// Number of tests contributing to the statistics.
    pub fn count(&self) -> usize {
        self.peaks.len()
    }

    pub fn mean(&self) -> f64 {
        if self.peaks.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.peaks.iter().map(|(_, peak)| peak).sum();
        sum / self.peaks.len() as f64
    }

    /// Sample standard deviation (n−1). Zero with fewer than two tests.
    pub fn std_dev(&self) -> f64 {
        if self.peaks.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq: f64 = self
            .peaks
            .iter()
            .map(|(_, peak)| (peak - mean).powi(2))
            .sum();
        (sum_sq / (self.peaks.len() - 1) as f64).sqrt()
    }

    /// `(mean, mean − 3σ, mean + 3σ)` quality-control band.
    pub fn three_sigma(&self) -> (f64, f64, f64) {
        let mean = self.mean();
        let std_dev = self.std_dev();
        (mean, mean - 3.0 * std_dev, mean + 3.0 * std_dev)
    }

    pub fn min_peak(&self) -> f64 {
        if self.peaks.is_empty() {
            return 0.0;
        }
        self.peaks
            .iter()
            .map(|(_, peak)| *peak)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn max_peak(&self) -> f64 {
        if self.peaks.is_empty() {
            return 0.0;
        }
        self.peaks
            .iter()
            .map(|(_, peak)| *peak)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn median_peak(&self) -> f64 {
        if self.peaks.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.peaks.iter().map(|(_, peak)| *peak).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// Per-test distance from the batch mean, in input order.
    pub fn deviations(&self) -> Vec<TestDeviation> {
        let mean = self.mean();
        self.peaks
            .iter()
            .map(|(test_name, peak)| TestDeviation {
                test_name: test_name.clone(),
                peak_force: *peak,
                deviation: peak - mean,
            })
            .collect()
    }

    pub fn summary(&self) -> StatisticsSummary {
        let (mean, lower_3sigma, upper_3sigma) = self.three_sigma();
        StatisticsSummary {
            count: self.count(),
            mean,
            std_dev: self.std_dev(),
            lower_3sigma,
            upper_3sigma,
            min: self.min_peak(),
            max: self.max_peak(),
            median: self.median_peak(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(name: &str, peak: Option<f64>) -> TestRecord {
        TestRecord {
            test_name: name.to_string(),
            datetime: "2026-08-07 10:00:00".to_string(),
            technician: "QA".to_string(),
            peak_force: peak,
            notes: String::new(),
            project: None,
            filepath: PathBuf::from(format!("{name}.csv")),
        }
    }

    #[test]
    fn test_empty_batch_is_all_zeros() {
        let stats = BatchStatistics::new(&[]);
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.std_dev(), 0.0);
        assert_eq!(stats.min_peak(), 0.0);
        assert_eq!(stats.max_peak(), 0.0);
        assert_eq!(stats.median_peak(), 0.0);
    }

    #[test]
    fn test_unparseable_peaks_are_skipped() {
        let records = vec![
            record("a", Some(10.0)),
            record("b", None),
            record("c", Some(12.0)),
        ];
        let stats = BatchStatistics::new(&records);
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.mean(), 11.0);

        // Deviations pair each surviving test with its own peak.
        let deviations = stats.deviations();
        assert_eq!(deviations.len(), 2);
        assert_eq!(deviations[0].test_name, "a");
        assert_eq!(deviations[0].deviation, -1.0);
        assert_eq!(deviations[1].test_name, "c");
        assert_eq!(deviations[1].deviation, 1.0);
    }

    #[test]
    fn test_sample_standard_deviation() {
        let records = vec![
            record("a", Some(2.0)),
            record("b", Some(4.0)),
            record("c", Some(4.0)),
            record("d", Some(4.0)),
            record("e", Some(5.0)),
            record("f", Some(5.0)),
            record("g", Some(7.0)),
            record("h", Some(9.0)),
        ];
        let stats = BatchStatistics::new(&records);
        assert_eq!(stats.mean(), 5.0);
        // Sample stdev of this classic set is sqrt(32/7).
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((stats.std_dev() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_single_test_has_degenerate_band() {
        let stats = BatchStatistics::new(&[record("only", Some(15.5))]);
        assert_eq!(stats.std_dev(), 0.0);
        let (mean, lower, upper) = stats.three_sigma();
        assert_eq!(mean, 15.5);
        assert_eq!(lower, 15.5);
        assert_eq!(upper, 15.5);
    }

    #[test]
    fn test_median_even_and_odd() {
        let odd = BatchStatistics::new(&[
            record("a", Some(3.0)),
            record("b", Some(1.0)),
            record("c", Some(2.0)),
        ]);
        assert_eq!(odd.median_peak(), 2.0);

        let even = BatchStatistics::new(&[
            record("a", Some(4.0)),
            record("b", Some(1.0)),
            record("c", Some(3.0)),
            record("d", Some(2.0)),
        ]);
        assert_eq!(even.median_peak(), 2.5);
    }

    #[test]
    fn test_summary_matches_parts() {
        let records = vec![record("a", Some(10.0)), record("b", Some(14.0))];
        let stats = BatchStatistics::new(&records);
        let summary = stats.summary();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean, 12.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 14.0);
        assert_eq!(summary.median, 12.0);
        assert_eq!(summary.lower_3sigma, summary.mean - 3.0 * summary.std_dev);
        assert_eq!(summary.upper_3sigma, summary.mean + 3.0 * summary.std_dev);
    }
}
