//! Elapsed-time progress heuristic for conversions.
//!
//! The external processor reports nothing until it is done, so both the
//! status endpoints and client-side displays derive a percentage and a
//! stage from file size and elapsed time. Everything here is pure so the
//! two sides always agree.

use serde::{Deserialize, Serialize};

use crate::status::ConversionStatus;

// ---------------------------------------------------------------------------
// Tuning constants
// ---------------------------------------------------------------------------

/// Fixed part of the expected duration, independent of file size.
pub const BASE_MS: f64 = 20_000.0;

/// Duration added per decade of file size (in megabytes).
pub const SCALE_MS: f64 = 40_000.0;

/// Highest percentage shown while a conversion is still processing.
/// 100 is reserved for `completed`.
pub const MAX_PROCESSING_PERCENT: u8 = 95;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Displayed pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Upload,
    Parse,
    Extract,
    Format,
    Complete,
    Failed,
}

/// Processing stages in order with their share of the total duration.
/// Weights sum to 1.0.
const STAGE_WEIGHTS: [(Stage, f64); 4] = [
    (Stage::Upload, 0.10),
    (Stage::Parse, 0.20),
    (Stage::Extract, 0.50),
    (Stage::Format, 0.20),
];

/// A displayed progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    pub percent: u8,
    pub stage: Stage,
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Expected total processing time for a file, in milliseconds.
///
/// Grows with `log10(size_mb + 1)` so very large files do not produce
/// absurd estimates.
pub fn expected_duration_ms(file_size_bytes: i64) -> f64 {
    let size_mb = file_size_bytes.max(0) as f64 / BYTES_PER_MB;
    BASE_MS + (size_mb + 1.0).log10() * SCALE_MS
}

/// Estimate progress for a conversion that is currently processing.
///
/// Monotonic non-decreasing in `elapsed_ms` for a fixed size, and never
/// above [`MAX_PROCESSING_PERCENT`].
pub fn estimate(file_size_bytes: i64, elapsed_ms: i64) -> ProgressEstimate {
    let total = expected_duration_ms(file_size_bytes);
    let ratio = (elapsed_ms.max(0) as f64 / total).min(1.0);

    let percent = ((ratio * 100.0).floor() as u8).min(MAX_PROCESSING_PERCENT);

    let mut cumulative = 0.0;
    let mut stage = Stage::Format;
    for (candidate, weight) in STAGE_WEIGHTS {
        cumulative += weight;
        if ratio < cumulative {
            stage = candidate;
            break;
        }
    }

    ProgressEstimate { percent, stage }
}

/// Progress for any status: fixed values outside `processing`.
pub fn progress_for_status(
    status: ConversionStatus,
    file_size_bytes: i64,
    elapsed_ms: i64,
) -> ProgressEstimate {
    match status {
        ConversionStatus::Pending => ProgressEstimate {
            percent: 0,
            stage: Stage::Queued,
        },
        ConversionStatus::Processing => estimate(file_size_bytes, elapsed_ms),
        ConversionStatus::Completed => ProgressEstimate {
            percent: 100,
            stage: Stage::Complete,
        },
        ConversionStatus::Failed => ProgressEstimate {
            percent: 0,
            stage: Stage::Failed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MB: i64 = 2 * 1024 * 1024;

    #[test]
    fn starts_at_zero_in_upload_stage() {
        let p = estimate(TWO_MB, 0);
        assert_eq!(p.percent, 0);
        assert_eq!(p.stage, Stage::Upload);
    }

    #[test]
    fn monotonic_in_elapsed_time() {
        for size in [0, 1024, TWO_MB, 500 * 1024 * 1024] {
            let mut last = 0u8;
            for elapsed in (0..600_000).step_by(250) {
                let p = estimate(size, elapsed);
                assert!(p.percent >= last, "size {size} elapsed {elapsed}");
                last = p.percent;
            }
        }
    }

    #[test]
    fn never_reaches_100_while_processing() {
        for size in [0, TWO_MB, i64::MAX / 2] {
            for elapsed in [0, 1, 10_000, 1_000_000, i64::MAX] {
                assert!(estimate(size, elapsed).percent < 100);
            }
        }
        assert_eq!(estimate(TWO_MB, i64::MAX).percent, MAX_PROCESSING_PERCENT);
    }

    #[test]
    fn negative_inputs_are_treated_as_zero() {
        assert_eq!(estimate(-5, -100), estimate(0, 0));
    }

    #[test]
    fn larger_files_take_longer_but_sublinearly() {
        let small = expected_duration_ms(1024 * 1024);
        let large = expected_duration_ms(100 * 1024 * 1024);
        assert!(large > small);
        assert!(large < small * 10.0);
    }

    #[test]
    fn stages_advance_in_order() {
        let total = expected_duration_ms(TWO_MB);
        let at = |fraction: f64| estimate(TWO_MB, (total * fraction) as i64).stage;
        assert_eq!(at(0.05), Stage::Upload);
        assert_eq!(at(0.2), Stage::Parse);
        assert_eq!(at(0.5), Stage::Extract);
        assert_eq!(at(0.9), Stage::Format);
        assert_eq!(at(5.0), Stage::Format);
    }

    #[test]
    fn deterministic() {
        assert_eq!(estimate(TWO_MB, 12_345), estimate(TWO_MB, 12_345));
    }

    #[test]
    fn fixed_values_outside_processing() {
        assert_eq!(
            progress_for_status(ConversionStatus::Completed, TWO_MB, 0),
            ProgressEstimate {
                percent: 100,
                stage: Stage::Complete
            }
        );
        assert_eq!(
            progress_for_status(ConversionStatus::Pending, TWO_MB, 99_999).stage,
            Stage::Queued
        );
        assert_eq!(
            progress_for_status(ConversionStatus::Failed, TWO_MB, 99_999).percent,
            0
        );
    }
}
