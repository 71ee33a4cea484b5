//! Percentile summary over signal-to-hit latency samples.

use serde::Serialize;
use utoipa::ToSchema;

/// Summary statistics of a sample buffer. Every field but `count` is `null`
/// for an empty buffer.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LatencySummary {
    /// Number of samples.
    pub count: usize,
    /// Smallest sample, milliseconds.
    pub min: Option<i64>,
    /// Largest sample, milliseconds.
    pub max: Option<i64>,
    /// Mean, rounded to two decimals.
    pub avg: Option<f64>,
    /// Median.
    pub p50: Option<i64>,
    /// 90th percentile.
    pub p90: Option<i64>,
    /// 95th percentile.
    pub p95: Option<i64>,
    /// 99th percentile.
    pub p99: Option<i64>,
}

impl LatencySummary {
    /// Builds the summary from unsorted samples.
    #[must_use]
    pub fn from_samples(samples: &[i64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let avg = (count > 0).then(|| {
            let sum: i64 = sorted.iter().copied().fold(0_i64, i64::saturating_add);
            #[allow(clippy::cast_precision_loss)]
            let mean = sum as f64 / count as f64;
            (mean * 100.0).round() / 100.0
        });

        Self {
            count,
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            avg,
            p50: percentile(&sorted, 50),
            p90: percentile(&sorted, 90),
            p95: percentile(&sorted, 95),
            p99: percentile(&sorted, 99),
        }
    }
}

/// Nearest-rank percentile of an ascending slice.
#[must_use]
pub fn percentile(sorted: &[i64], p: usize) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    // ceil(p/100 * n) - 1, clamped into range.
    let rank = (p * sorted.len()).div_ceil(100).saturating_sub(1);
    sorted.get(rank.min(sorted.len() - 1)).copied()
}
