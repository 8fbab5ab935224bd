//! Distance-to-similarity mapping shared by identity matching and
//! unknown-face grouping.
//!
//! Similarity is `max(0, 1 - d / 2)` where `d` is the Euclidean distance.
//! The acceptance and grouping thresholds are calibrated against this exact
//! mapping and must move with it.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("descriptor dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Euclidean distance between two equal-length encodings.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Similarity in [0, 1] between two encodings.
///
/// An empty encoding on either side scores 0 (never matches). Non-empty
/// encodings of different lengths are a [`SimilarityError::DimensionMismatch`].
pub fn similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.is_empty() || b.is_empty() {
        return Ok(0.0);
    }
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    // NaN components collapse to 0 through `max`.
    Ok((1.0 - euclidean_distance(a, b) / 2.0).max(0.0))
}

/// [`similarity`] for pipeline callers: a mismatch scores 0 for this one
/// comparison and is logged, instead of aborting the detection.
pub(crate) fn similarity_or_zero(a: &[f32], b: &[f32], against: &dyn fmt::Display) -> f32 {
    match similarity(a, b) {
        Ok(score) => score,
        Err(err) => {
            tracing::warn!(error = %err, against = %against, "skipping comparison");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_encodings() {
        let a = [0.3, -0.2, 0.9];
        assert!((similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_small_offset() {
        let a = [0.0, 0.0, 0.0, 0.0];
        let b = [0.0, 0.0, 0.0, 0.1];
        assert!((similarity(&a, &b).unwrap() - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_far_apart_clamps_to_zero() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_eq!(similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = similarity(&[0.0, 1.0], &[0.0]).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { left: 2, right: 1 });
        assert_eq!(similarity_or_zero(&[0.0, 1.0], &[0.0], &"test"), 0.0);
    }

    #[test]
    fn test_empty_encoding_never_matches() {
        assert_eq!(similarity(&[], &[]).unwrap(), 0.0);
        assert_eq!(similarity(&[], &[0.5, 0.5]).unwrap(), 0.0);
    }

    #[test]
    fn test_nan_component_scores_zero() {
        assert_eq!(similarity(&[f32::NAN], &[0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = [0.1, 0.4, -0.3];
        let b = [0.2, 0.1, 0.0];
        assert_eq!(similarity(&a, &b).unwrap(), similarity(&b, &a).unwrap());
    }
}
