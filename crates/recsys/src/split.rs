//! Temporal train/test partitioning
//!
//! Ratings are cut at a timestamp boundary so that every train rating strictly
//! precedes every test rating. The boundary is aligned to whole timestamp
//! buckets: ratings sharing a timestamp always land on the same side.

use crate::error::{RecsysError, Result};
use crate::types::Rating;
use std::collections::BTreeMap;

/// Outcome of a temporal split
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSplit {
    pub train: Vec<Rating>,
    pub test: Vec<Rating>,
    /// Train holds timestamps `< boundary`, test holds `>= boundary`
    pub boundary: i64,
}

/// Split `ratings` into train and test by timestamp.
///
/// Timestamp buckets are walked in ascending order; while fewer than
/// `train_fraction * len` ratings have been accumulated, the current bucket
/// becomes the boundary. A fraction `<= 0` leaves train empty, a fraction
/// `>= 1` leaves test empty.
pub fn split(ratings: &[Rating], train_fraction: f64) -> Result<TimeSplit> {
    if train_fraction.is_nan() {
        return Err(RecsysError::invalid_config(
            "train_fraction must be a number",
        ));
    }

    let mut sorted = ratings.to_vec();
    sorted.sort_by_key(|r| r.timestamp);

    let (first, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => {
            return Ok(TimeSplit {
                train: Vec::new(),
                test: Vec::new(),
                boundary: 0,
            })
        }
    };

    let boundary = if train_fraction >= 1.0 {
        last.saturating_add(1)
    } else {
        let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
        for r in &sorted {
            *buckets.entry(r.timestamp).or_insert(0) += 1;
        }

        let target = sorted.len() as f64 * train_fraction;
        let mut boundary = first;
        let mut accumulated = 0usize;
        for (&timestamp, &count) in &buckets {
            if (accumulated as f64) >= target {
                break;
            }
            boundary = timestamp;
            accumulated += count;
        }
        boundary
    };

    let (train, test): (Vec<Rating>, Vec<Rating>) =
        sorted.into_iter().partition(|r| r.timestamp < boundary);

    tracing::debug!(
        "Temporal split at {}: {} train / {} test ratings",
        boundary,
        train.len(),
        test.len()
    );

    Ok(TimeSplit {
        train,
        test,
        boundary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings_at(timestamps: &[i64]) -> Vec<Rating> {
        timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| Rating::new(i as u32, 100 + i as u32, 3.0, ts))
            .collect()
    }

    #[test]
    fn test_split_respects_buckets() {
        let ratings = ratings_at(&[1, 1, 2, 2, 2, 3, 4]);
        let result = split(&ratings, 0.75).unwrap();

        // cumulative buckets 2, 5, 6 reach the 5.25 target at timestamp 3
        assert_eq!(result.boundary, 3);
        assert_eq!(result.train.len(), 5);
        assert_eq!(result.test.len(), 2);

        let max_train = result.train.iter().map(|r| r.timestamp).max().unwrap();
        let min_test = result.test.iter().map(|r| r.timestamp).min().unwrap();
        assert!(max_train < min_test);
    }

    #[test]
    fn test_split_is_a_partition() {
        let ratings = ratings_at(&[4, 1, 2, 3, 2, 1, 2]);
        let result = split(&ratings, 0.75).unwrap();

        let mut rebuilt: Vec<Rating> = result
            .train
            .iter()
            .chain(result.test.iter())
            .copied()
            .collect();
        let mut original = ratings.clone();
        rebuilt.sort_by_key(|r| r.user_id);
        original.sort_by_key(|r| r.user_id);
        assert_eq!(rebuilt, original);

        for r in &result.train {
            assert!(!result.test.contains(r));
        }
    }

    #[test]
    fn test_zero_fraction_gives_empty_train() {
        let ratings = ratings_at(&[5, 6, 7]);
        let result = split(&ratings, 0.0).unwrap();
        assert_eq!(result.boundary, 5);
        assert!(result.train.is_empty());
        assert_eq!(result.test.len(), 3);
    }

    #[test]
    fn test_full_fraction_gives_empty_test() {
        let ratings = ratings_at(&[5, 6, 7]);
        let result = split(&ratings, 1.0).unwrap();
        assert_eq!(result.boundary, 8);
        assert_eq!(result.train.len(), 3);
        assert!(result.test.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let result = split(&[], 0.5).unwrap();
        assert!(result.train.is_empty());
        assert!(result.test.is_empty());
    }

    #[test]
    fn test_nan_fraction_rejected() {
        let ratings = ratings_at(&[1, 2]);
        assert!(matches!(
            split(&ratings, f64::NAN),
            Err(RecsysError::InvalidConfiguration(_))
        ));
    }
}
