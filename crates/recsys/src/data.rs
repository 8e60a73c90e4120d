//! CSV loaders for rating and item tables
//!
//! Rating files are read by header name (`user_id`, `item_id`, `rating`,
//! `timestamp`); extra columns such as an exported row index are ignored.
//! Item files are positional: `item_id, title, release_date, imdb_url`
//! followed by one column per genre flag. A leading unnamed index column is
//! skipped.

use crate::error::{RecsysError, Result};
use crate::types::{Item, Rating};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::HashSet;
use std::io;
use std::path::Path;

/// Release date format of the item table, e.g. `01-Jan-1995`
pub const RELEASE_DATE_FORMAT: &str = "%d-%b-%Y";

const ITEM_FIXED_COLUMNS: usize = 4;

#[derive(Debug, Deserialize)]
struct RatingRow {
    user_id: u32,
    item_id: u32,
    rating: f64,
    timestamp: i64,
}

/// Load ratings from a CSV file, dropping exact duplicate rows
pub fn load_ratings(path: impl AsRef<Path>) -> Result<Vec<Rating>> {
    let path = path.as_ref();
    let ratings = read_ratings(std::fs::File::open(path)?)?;
    tracing::info!("Loaded {} ratings from {}", ratings.len(), path.display());
    Ok(ratings)
}

pub fn read_ratings<R: io::Read>(reader: R) -> Result<Vec<Rating>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut seen = HashSet::new();
    let mut ratings = Vec::new();

    for row in reader.deserialize::<RatingRow>() {
        let row = row?;
        if !seen.insert((row.user_id, row.item_id, row.rating.to_bits(), row.timestamp)) {
            continue;
        }
        ratings.push(Rating::new(row.user_id, row.item_id, row.rating, row.timestamp));
    }

    Ok(ratings)
}

/// Load items from a CSV file.
///
/// Rows with an unparseable release date are skipped with a warning, and
/// only the first row of each title is kept.
pub fn load_items(path: impl AsRef<Path>) -> Result<Vec<Item>> {
    let path = path.as_ref();
    let items = read_items(std::fs::File::open(path)?)?;
    tracing::info!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

pub fn read_items<R: io::Read>(reader: R) -> Result<Vec<Item>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();

    let offset = match headers.get(0) {
        Some(first) if first.is_empty() || first.starts_with("Unnamed") => 1,
        _ => 0,
    };
    if headers.len() <= offset + ITEM_FIXED_COLUMNS {
        return Err(RecsysError::DataFormat(format!(
            "item table needs item_id, title, release_date, imdb_url and genre columns, got {} columns",
            headers.len()
        )));
    }

    let mut titles = HashSet::new();
    let mut items = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(offset + i).unwrap_or("").trim();

        let item_id: u32 = field(0).parse().map_err(|e| {
            RecsysError::DataFormat(format!("row {}: bad item_id '{}': {}", line + 2, field(0), e))
        })?;

        let release_year = match NaiveDate::parse_from_str(field(2), RELEASE_DATE_FORMAT) {
            Ok(date) => date.year(),
            Err(_) => {
                tracing::warn!(
                    "Skipping item {}: unparseable release date '{}'",
                    item_id,
                    field(2)
                );
                skipped += 1;
                continue;
            }
        };

        let title = field(1).to_string();
        if !titles.insert(title.clone()) {
            tracing::debug!("Skipping item {}: duplicate title '{}'", item_id, title);
            skipped += 1;
            continue;
        }

        let genres = (offset + ITEM_FIXED_COLUMNS..record.len())
            .map(|i| {
                let raw = record.get(i).unwrap_or("").trim();
                raw.parse::<f32>().map_err(|e| {
                    RecsysError::DataFormat(format!(
                        "row {}: bad genre flag '{}' in column {}: {}",
                        line + 2,
                        raw,
                        headers.get(i).unwrap_or("?"),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        items.push(Item {
            item_id,
            title,
            release_year,
            genres,
        });
    }

    if skipped > 0 {
        tracing::info!("Skipped {} item rows", skipped);
    }
    Ok(items)
}
