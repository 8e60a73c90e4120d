//! Cross-model prediction behavior

use crate::collaborative::CollaborativeFilteringModel;
use crate::config::{CollaborativeConfig, FactorizationConfig};
use crate::matrix_factorization::MatrixFactorization;
use crate::types::Rating;
use std::collections::HashSet;

fn ratings() -> Vec<Rating> {
    vec![
        Rating::new(1, 10, 5.0, 1),
        Rating::new(1, 20, 1.0, 2),
        Rating::new(2, 10, 4.0, 3),
        Rating::new(2, 20, 2.0, 4),
        Rating::new(2, 30, 5.0, 5),
        Rating::new(3, 30, 2.0, 6),
    ]
}

#[test]
fn test_models_share_fallbacks_for_unknown_ids() {
    let cf = CollaborativeFilteringModel::fit(&ratings(), CollaborativeConfig::default()).unwrap();
    let mf = MatrixFactorization::fit(&ratings(), FactorizationConfig::default()).unwrap();

    // unknown user -> item mean
    assert_eq!(cf.predict_one(99, 30), 3.5);
    assert_eq!(mf.predict_one(99, 30), 3.5);

    // unknown item -> user mean
    assert_eq!(cf.predict_one(1, 99), 3.0);
    assert_eq!(mf.predict_one(1, 99), 3.0);

    // both unknown -> global mean
    assert_eq!(cf.predict_one(99, 99), mf.predict_one(99, 99));
}

#[test]
fn test_item_without_similar_raters_predicts_user_mean() {
    // no rater of item 30 is that similar to user 1
    let cf = CollaborativeFilteringModel::fit(&ratings(), CollaborativeConfig::default()).unwrap();
    let mean = cf.rating_matrix().user_mean(1).unwrap();

    assert_eq!(cf.predict_one_with(1, 30, 10, 0.99), mean);
}

#[test]
fn test_top_n_lists_are_bounded_and_unique() {
    let cf = CollaborativeFilteringModel::fit(&ratings(), CollaborativeConfig::default()).unwrap();
    let mf = MatrixFactorization::fit(&ratings(), FactorizationConfig::default()).unwrap();

    for top in [cf.top_n(3, 10).unwrap(), mf.top_n(3, 10).unwrap()] {
        assert_eq!(top.len(), 3);
        assert!(top.windows(2).all(|pair| pair[0].score >= pair[1].score));
        let ids: HashSet<_> = top.iter().map(|s| s.item_id).collect();
        assert_eq!(ids.len(), top.len());
    }
}
