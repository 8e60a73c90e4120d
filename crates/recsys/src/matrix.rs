//! Sparse user-item rating matrix
//!
//! Missing entries mean "unobserved", never zero. Duplicate (user, item)
//! ratings are averaged when the matrix is built. Users and items are kept in
//! ascending id order so dense projections are deterministic.

use crate::types::{ItemId, Rating, UserId};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Sparse `user_id -> (item_id -> rating)` table with cached means
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingMatrix {
    rows: BTreeMap<UserId, BTreeMap<ItemId, f64>>,
    items: BTreeSet<ItemId>,
    user_means: BTreeMap<UserId, f64>,
    item_means: BTreeMap<ItemId, f64>,
    global_mean: f64,
}

impl RatingMatrix {
    /// Pivot ratings into a matrix, averaging duplicate cells
    pub fn from_ratings(ratings: &[Rating]) -> Self {
        let mut sums: BTreeMap<UserId, BTreeMap<ItemId, (f64, usize)>> = BTreeMap::new();

        for r in ratings {
            let cell = sums
                .entry(r.user_id)
                .or_default()
                .entry(r.item_id)
                .or_insert((0.0, 0));
            cell.0 += r.rating;
            cell.1 += 1;
        }

        let rows: BTreeMap<UserId, BTreeMap<ItemId, f64>> = sums
            .into_iter()
            .map(|(user, cells)| {
                let row = cells
                    .into_iter()
                    .map(|(item, (sum, count))| (item, sum / count as f64))
                    .collect();
                (user, row)
            })
            .collect();

        Self::from_rows(rows)
    }

    fn from_rows(rows: BTreeMap<UserId, BTreeMap<ItemId, f64>>) -> Self {
        let mut items = BTreeSet::new();
        let mut item_acc: BTreeMap<ItemId, (f64, usize)> = BTreeMap::new();
        let mut user_means = BTreeMap::new();
        let mut total = 0.0;
        let mut count = 0usize;

        for (&user, row) in &rows {
            let row_sum: f64 = row.values().sum();
            user_means.insert(user, row_sum / row.len() as f64);
            total += row_sum;
            count += row.len();

            for (&item, &rating) in row {
                items.insert(item);
                let acc = item_acc.entry(item).or_insert((0.0, 0));
                acc.0 += rating;
                acc.1 += 1;
            }
        }

        let item_means = item_acc
            .into_iter()
            .map(|(item, (sum, n))| (item, sum / n as f64))
            .collect();

        let global_mean = if count > 0 { total / count as f64 } else { 0.0 };

        Self {
            rows,
            items,
            user_means,
            item_means,
            global_mean,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_users(&self) -> usize {
        self.rows.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    /// Number of observed cells
    pub fn nnz(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn contains_user(&self, user: UserId) -> bool {
        self.rows.contains_key(&user)
    }

    pub fn contains_item(&self, item: ItemId) -> bool {
        self.items.contains(&item)
    }

    /// Known users in ascending order
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.rows.keys().copied()
    }

    /// Known items in ascending order
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.iter().copied()
    }

    pub fn get(&self, user: UserId, item: ItemId) -> Option<f64> {
        self.rows.get(&user).and_then(|row| row.get(&item)).copied()
    }

    /// Observed ratings of one user
    pub fn user_row(&self, user: UserId) -> Option<&BTreeMap<ItemId, f64>> {
        self.rows.get(&user)
    }

    /// Users who rated `item`, ascending
    pub fn raters_of(&self, item: ItemId) -> impl Iterator<Item = (UserId, f64)> + '_ {
        self.rows
            .iter()
            .filter_map(move |(&user, row)| row.get(&item).map(|&rating| (user, rating)))
    }

    pub fn user_mean(&self, user: UserId) -> Option<f64> {
        self.user_means.get(&user).copied()
    }

    pub fn item_mean(&self, item: ItemId) -> Option<f64> {
        self.item_means.get(&item).copied()
    }

    /// Mean of every observed rating; 0 for an empty matrix
    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    /// Mean-based estimate used whenever a model cannot score a pair:
    /// item mean for an unknown user, user mean for an unknown item,
    /// global mean when both are unknown.
    pub fn fallback_rating(&self, user: UserId, item: ItemId) -> f64 {
        if !self.contains_user(user) {
            if let Some(mean) = self.item_mean(item) {
                return mean;
            }
        }
        self.user_mean(user).unwrap_or(self.global_mean)
    }

    /// Dense projection with explicit id <-> index maps
    pub fn to_dense(&self, fill: impl Fn(UserId) -> f64) -> DenseRatings {
        let user_ids: Vec<UserId> = self.users().collect();
        let item_ids: Vec<ItemId> = self.items().collect();
        let item_index: HashMap<ItemId, usize> =
            item_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut values = Array2::<f64>::zeros((user_ids.len(), item_ids.len()));
        for (u, &user) in user_ids.iter().enumerate() {
            let default = fill(user);
            values.row_mut(u).fill(default);
            if let Some(row) = self.rows.get(&user) {
                for (item, &rating) in row {
                    values[[u, item_index[item]]] = rating;
                }
            }
        }

        let user_index = user_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        DenseRatings {
            values,
            user_ids,
            item_ids,
            user_index,
            item_index,
        }
    }
}

/// Dense users x items matrix in ascending id order
#[derive(Debug, Clone)]
pub struct DenseRatings {
    pub values: Array2<f64>,
    pub user_ids: Vec<UserId>,
    pub item_ids: Vec<ItemId>,
    pub user_index: HashMap<UserId, usize>,
    pub item_index: HashMap<ItemId, usize>,
}
