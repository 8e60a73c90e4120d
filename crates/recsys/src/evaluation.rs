//! Offline evaluation
//!
//! Rating accuracy is aggregated per user first and then averaged with equal
//! weight per user, so heavy raters do not dominate the score.

use crate::error::{RecsysError, Result};
use crate::types::{ItemId, Prediction, Rating, ScoredItem, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Per-user averaged rating error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub mae: f64,
    /// Square root of the per-user averaged mean squared error
    pub rmse: f64,
    /// Number of users the errors were averaged over
    pub users: usize,
}

/// Top-N quality against the items a user liked
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// MAE and RMSE of `predictions`, computed per user then averaged
///
/// # Errors
/// `EmptyDataset` when there is nothing to evaluate.
pub fn evaluate(predictions: &[Prediction]) -> Result<EvaluationReport> {
    if predictions.is_empty() {
        return Err(RecsysError::EmptyDataset(
            "no predictions to evaluate".to_string(),
        ));
    }

    // user -> (sum |err|, sum err^2, count)
    let mut per_user: BTreeMap<UserId, (f64, f64, usize)> = BTreeMap::new();
    for p in predictions {
        let error = p.predicted - p.rating;
        let acc = per_user.entry(p.user_id).or_insert((0.0, 0.0, 0));
        acc.0 += error.abs();
        acc.1 += error * error;
        acc.2 += 1;
    }

    let users = per_user.len();
    let (mae_sum, mse_sum) = per_user
        .values()
        .fold((0.0, 0.0), |(mae, mse), &(abs_sum, sq_sum, count)| {
            (mae + abs_sum / count as f64, mse + sq_sum / count as f64)
        });

    let report = EvaluationReport {
        mae: mae_sum / users as f64,
        rmse: (mse_sum / users as f64).sqrt(),
        users,
    };

    tracing::info!(
        "Evaluated {} predictions over {} users: MAE {:.4}, RMSE {:.4}",
        predictions.len(),
        users,
        report.mae,
        report.rmse
    );

    Ok(report)
}

/// Precision, recall and F1 of a top-N list for one user.
///
/// An item counts as liked when the user rated it at or above their own mean
/// rating in `user_ratings`.
pub fn ranking_metrics(top_n: &[ScoredItem], user_ratings: &[Rating]) -> RankingReport {
    let mut report = RankingReport {
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
    };
    if top_n.is_empty() || user_ratings.is_empty() {
        return report;
    }

    let mean = user_ratings.iter().map(|r| r.rating).sum::<f64>() / user_ratings.len() as f64;
    let liked: HashSet<ItemId> = user_ratings
        .iter()
        .filter(|r| r.rating >= mean)
        .map(|r| r.item_id)
        .collect();

    let hits = top_n.iter().filter(|s| liked.contains(&s.item_id)).count() as f64;

    report.precision = hits / top_n.len() as f64;
    report.recall = hits / liked.len() as f64;
    if report.precision + report.recall > 0.0 {
        report.f1 =
            2.0 * report.precision * report.recall / (report.precision + report.recall);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(user_id: UserId, rating: f64, predicted: f64) -> Prediction {
        Prediction {
            user_id,
            item_id: 1,
            rating,
            predicted,
        }
    }

    #[test]
    fn test_evaluate_averages_per_user() {
        // user 1: errors 1 and 0 -> MAE 0.5, MSE 0.5
        // user 2: error 2        -> MAE 2.0, MSE 4.0
        let predictions = vec![
            prediction(1, 5.0, 4.0),
            prediction(1, 3.0, 3.0),
            prediction(2, 4.0, 2.0),
        ];

        let report = evaluate(&predictions).unwrap();
        assert!((report.mae - 1.25).abs() < 1e-12);
        assert!((report.rmse - 1.5).abs() < 1e-12);
        assert_eq!(report.users, 2);
    }

    #[test]
    fn test_evaluate_perfect_predictions() {
        let predictions = vec![prediction(1, 4.0, 4.0), prediction(2, 2.0, 2.0)];
        let report = evaluate(&predictions).unwrap();
        assert_eq!(report.mae, 0.0);
        assert_eq!(report.rmse, 0.0);
    }

    #[test]
    fn test_evaluate_empty() {
        assert!(matches!(evaluate(&[]), Err(RecsysError::EmptyDataset(_))));
    }

    #[test]
    fn test_ranking_metrics() {
        // mean 3.0 -> liked: 10 (5.0), 20 (3.0)
        let ratings = vec![
            Rating::new(1, 10, 5.0, 1),
            Rating::new(1, 20, 3.0, 2),
            Rating::new(1, 30, 1.0, 3),
        ];
        let top = vec![
            ScoredItem { item_id: 10, score: 4.8 },
            ScoredItem { item_id: 30, score: 4.1 },
            ScoredItem { item_id: 40, score: 3.9 },
            ScoredItem { item_id: 50, score: 3.0 },
        ];

        let report = ranking_metrics(&top, &ratings);
        assert!((report.precision - 0.25).abs() < 1e-12);
        assert!((report.recall - 0.5).abs() < 1e-12);
        assert!((report.f1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ranking_metrics_without_hits() {
        let ratings = vec![Rating::new(1, 10, 5.0, 1)];
        let top = vec![ScoredItem { item_id: 99, score: 5.0 }];

        let report = ranking_metrics(&top, &ratings);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.f1, 0.0);
        assert_eq!(ranking_metrics(&[], &ratings).recall, 0.0);
    }
}
