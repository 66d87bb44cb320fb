// Score Normalizer
//
// Maps a batch of decision-function scores (lower = more anomalous) onto
// [0, 1] with higher = more anomalous. Normalization is relative to the
// batch: the same raw score can map to different values in different calls.

/// Min-max normalize and invert a batch of raw scores
///
/// A batch without spread (single sample, identical scores) maps to all
/// zeros since there is nothing to discriminate.
pub fn normalize(raw_scores: &[f64]) -> Vec<f64> {
    let Some((min, max)) = bounds(raw_scores) else {
        return Vec::new();
    };

    let range = max - min;
    if range <= 0.0 {
        return vec![0.0; raw_scores.len()];
    }

    raw_scores
        .iter()
        .map(|score| (1.0 - (score - min) / range).clamp(0.0, 1.0))
        .collect()
}

fn bounds(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(min, max), &v| (min.min(v), max.max(v))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_batch() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_degenerate_batches_are_zero() {
        assert_eq!(normalize(&[-0.42]), vec![0.0]);
        assert_eq!(normalize(&[-0.5, -0.5, -0.5]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_inversion() {
        // Lowest raw score is the most anomalous
        let normalized = normalize(&[-0.7, -0.4, -0.55]);
        assert_eq!(normalized[0], 1.0);
        assert_eq!(normalized[1], 0.0);
        assert!((normalized[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_batch_relative() {
        // Same raw score, different batch, different normalized value
        let a = normalize(&[-0.5, -0.6]);
        let b = normalize(&[-0.5, -0.4]);
        assert_eq!(a[0], 0.0);
        assert_eq!(b[0], 1.0);
    }

    proptest! {
        #[test]
        fn prop_normalized_within_unit_interval(
            scores in prop::collection::vec(-1.0f64..0.0, 1..200)
        ) {
            let normalized = normalize(&scores);
            prop_assert_eq!(normalized.len(), scores.len());
            for value in &normalized {
                prop_assert!((0.0..=1.0).contains(value));
            }
        }

        #[test]
        fn prop_uniform_batch_is_zero(score in -1.0f64..0.0, len in 1usize..50) {
            let normalized = normalize(&vec![score; len]);
            prop_assert!(normalized.iter().all(|&v| v == 0.0));
        }

        #[test]
        fn prop_order_is_reversed(
            scores in prop::collection::vec(-1.0f64..0.0, 2..100)
        ) {
            let normalized = normalize(&scores);
            for i in 0..scores.len() {
                for j in 0..scores.len() {
                    if scores[i] < scores[j] {
                        prop_assert!(normalized[i] >= normalized[j]);
                    }
                }
            }
        }
    }
}
