//! Core data types shared by the recommenders

use serde::{Deserialize, Serialize};

pub type UserId = u32;
pub type ItemId = u32;

/// A single observed rating
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f64,
    /// Epoch seconds
    pub timestamp: i64,
}

impl Rating {
    pub fn new(user_id: UserId, item_id: ItemId, rating: f64, timestamp: i64) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }
}

/// Item metadata as consumed by the content encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub title: String,
    pub release_year: i32,
    /// Genre indicator flags, taken as-is into the feature vector
    pub genres: Vec<f32>,
}

/// Item with a predicted score, ordered by the producing model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f64,
}

/// Nearest-neighbor hit from the content index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub item_id: ItemId,
    pub distance: f32,
}

/// Held-out rating paired with the model's prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f64,
    pub predicted: f64,
}

/// Sort descending by score, ties by ascending item id
pub(crate) fn rank_scored(items: &mut [ScoredItem]) {
    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_scored_breaks_ties_by_item_id() {
        let mut items = vec![
            ScoredItem { item_id: 9, score: 3.0 },
            ScoredItem { item_id: 2, score: 4.0 },
            ScoredItem { item_id: 1, score: 3.0 },
        ];
        rank_scored(&mut items);

        let ids: Vec<ItemId> = items.iter().map(|s| s.item_id).collect();
        assert_eq!(ids, vec![2, 1, 9]);
    }
}
