//! Issue time-to-fix statistics.

use serde::Serialize;

const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;

/// Issues closed faster than this count as fast resolutions.
const FAST_RESOLUTION_SECS: f64 = 3600.0;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn days(seconds: f64, decimals: i32) -> f64 {
    round_to(seconds / SECONDS_PER_DAY, decimals)
}

/// Summary row of the time-to-fix dataset, one per repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionStats {
    pub repository: String,
    pub issues_analyzed: usize,
    pub mean_days: f64,
    pub std_dev_days: f64,
    pub p25_days: f64,
    pub median_days: f64,
    pub p75_days: f64,
    pub min_days: f64,
    pub max_days: f64,
    pub total_days: f64,
    pub fast_resolutions: usize,
}

impl ResolutionStats {
    pub const COLUMNS: [&'static str; 11] = [
        "repository",
        "issues_analyzed",
        "mean_days",
        "std_dev_days",
        "p25_days",
        "median_days",
        "p75_days",
        "min_days",
        "max_days",
        "total_days",
        "fast_resolutions",
    ];

    /// Statistics over resolution times in seconds.
    ///
    /// Percentiles index the sorted sample at `floor(n * q)`; the standard
    /// deviation is the population one. Returns `None` for an empty sample.
    pub fn from_seconds(repository: &str, resolution_seconds: &[f64]) -> Option<Self> {
        if resolution_seconds.is_empty() {
            return None;
        }

        let mut sorted = resolution_seconds.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len();
        let total: f64 = sorted.iter().sum();
        let mean = total / n as f64;
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];

        Some(Self {
            repository: repository.to_string(),
            issues_analyzed: n,
            mean_days: days(mean, 4),
            std_dev_days: days(variance.sqrt(), 4),
            p25_days: days(at(0.25), 2),
            median_days: days(sorted[n / 2], 4),
            p75_days: days(at(0.75), 4),
            min_days: days(sorted[0], 4),
            max_days: days(sorted[n - 1], 4),
            total_days: days(total, 4),
            fast_resolutions: sorted.iter().filter(|&&s| s < FAST_RESOLUTION_SECS).count(),
        })
    }
}

/// Resolution time in days, rounded for the details dataset.
pub fn resolution_days(seconds: f64) -> f64 {
    days(seconds, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: f64 = SECONDS_PER_DAY;

    #[test]
    fn test_empty_sample() {
        assert!(ResolutionStats::from_seconds("a/b", &[]).is_none());
    }

    #[test]
    fn test_percentiles_and_moments() {
        let sample = [4.0 * DAY, 1.0 * DAY, 3.0 * DAY, 2.0 * DAY];
        let stats = ResolutionStats::from_seconds("a/b", &sample).unwrap();

        assert_eq!(stats.issues_analyzed, 4);
        assert_eq!(stats.mean_days, 2.5);
        assert_eq!(stats.median_days, 3.0);
        assert_eq!(stats.p25_days, 2.0);
        assert_eq!(stats.p75_days, 4.0);
        assert_eq!(stats.min_days, 1.0);
        assert_eq!(stats.max_days, 4.0);
        assert_eq!(stats.total_days, 10.0);
        assert_eq!(stats.std_dev_days, 1.118);
        assert_eq!(stats.fast_resolutions, 0);
    }

    #[test]
    fn test_fast_resolutions() {
        let stats = ResolutionStats::from_seconds("a/b", &[60.0, 3599.0, 3600.0]).unwrap();
        assert_eq!(stats.fast_resolutions, 2);
    }

    #[test]
    fn test_single_issue() {
        let stats = ResolutionStats::from_seconds("a/b", &[DAY]).unwrap();
        assert_eq!(stats.p25_days, 1.0);
        assert_eq!(stats.p75_days, 1.0);
        assert_eq!(stats.std_dev_days, 0.0);
    }

    #[test]
    fn test_resolution_days_rounding() {
        assert_eq!(resolution_days(DAY * 1.234), 1.23);
    }
}
