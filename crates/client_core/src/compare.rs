use std::{collections::BTreeSet, sync::Arc};

use futures::future::join_all;
use shared::protocol::{PostPage, PostSummary};
use storage::{LocalStore, MAX_COMPARED_ITEMS};
use tracing::warn;

use crate::{
    error::{CompareError, TransportError},
    transport::ListingSource,
};

/// Page size used to offer every approved listing as a comparison candidate.
pub const CANDIDATE_PAGE_SIZE: u32 = 1000;

/// Listings picked on the selection tab, before they are saved.
#[derive(Debug, Clone, Default)]
pub struct CompareSelection {
    selected: Vec<PostSummary>,
}

impl CompareSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> &[PostSummary] {
        &self.selected
    }

    pub fn is_selected(&self, post: &PostSummary) -> bool {
        self.selected.iter().any(|existing| existing.id == post.id)
    }

    /// Adds or removes `post`. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, post: &PostSummary) -> Result<bool, CompareError> {
        if self.is_selected(post) {
            self.selected.retain(|existing| existing.id != post.id);
            return Ok(false);
        }
        if self.selected.len() >= MAX_COMPARED_ITEMS {
            return Err(CompareError::LimitReached {
                limit: MAX_COMPARED_ITEMS,
            });
        }
        self.selected.push(post.clone());
        Ok(true)
    }

    /// Saves the selection's slugs; exactly two listings are required.
    pub async fn confirm(&self, store: &LocalStore) -> Result<Vec<String>, CompareError> {
        if self.selected.len() != MAX_COMPARED_ITEMS {
            return Err(CompareError::WrongSelectionSize {
                expected: MAX_COMPARED_ITEMS,
                actual: self.selected.len(),
            });
        }
        let slugs: Vec<String> = self.selected.iter().map(|post| post.slug.clone()).collect();
        store.set_compared_items(&slugs).await?;
        Ok(slugs)
    }
}

pub struct CompareBoard {
    store: LocalStore,
    source: Arc<dyn ListingSource>,
}

impl CompareBoard {
    pub fn new(store: LocalStore, source: Arc<dyn ListingSource>) -> Self {
        Self { store, source }
    }

    /// Fetches every stored slug. Listings that fail to load are skipped.
    pub async fn load(&self) -> Result<Vec<PostSummary>, CompareError> {
        let slugs = self.store.compared_items().await?;
        let fetched = join_all(slugs.iter().map(|slug| self.source.post_by_slug(slug))).await;
        Ok(slugs
            .iter()
            .zip(fetched)
            .filter_map(|(slug, result)| match result {
                Ok(post) => Some(post),
                Err(err) => {
                    warn!(slug = %slug, error = %err, "compare: failed to load listing");
                    None
                }
            })
            .collect())
    }

    pub async fn candidates(&self) -> Result<PostPage, TransportError> {
        self.source.approved_posts(1, CANDIDATE_PAGE_SIZE).await
    }

    pub async fn save(&self, selection: &CompareSelection) -> Result<Vec<String>, CompareError> {
        selection.confirm(&self.store).await
    }

    pub async fn remove(&self, slug: &str) -> Result<Vec<String>, CompareError> {
        Ok(self.store.remove_compared_item(slug).await?)
    }

    pub async fn clear(&self) -> Result<(), CompareError> {
        Ok(self.store.clear_compared_items().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRow {
    pub label: String,
    pub values: Vec<String>,
}

impl ComparisonRow {
    fn new(label: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }
}

/// Feature table, one column per listing. Amenity rows cover every amenity
/// any of the listings mentions.
pub fn comparison_rows(items: &[PostSummary]) -> Vec<ComparisonRow> {
    let mut rows = vec![
        ComparisonRow::new(
            "Price",
            items
                .iter()
                .map(|item| format!("{}/month", format_price(item.price)))
                .collect(),
        ),
        ComparisonRow::new(
            "Area",
            items.iter().map(|item| format!("{} m²", item.area)).collect(),
        ),
        ComparisonRow::new(
            "Address",
            items
                .iter()
                .map(|item| item.address_line().unwrap_or("N/A").to_string())
                .collect(),
        ),
        ComparisonRow::new(
            "Category",
            items
                .iter()
                .map(|item| item.category_name.clone().unwrap_or_else(|| "N/A".into()))
                .collect(),
        ),
    ];

    let amenities: BTreeSet<&String> = items
        .iter()
        .flat_map(|item| item.amenities.keys())
        .collect();
    for amenity in amenities {
        rows.push(ComparisonRow::new(
            amenity.clone(),
            items
                .iter()
                .map(|item| {
                    if item.amenities.get(amenity).copied().unwrap_or(false) {
                        "Yes".to_string()
                    } else {
                        "No".to_string()
                    }
                })
                .collect(),
        ));
    }
    rows
}

/// Case-insensitive match on title or address; a blank query keeps everything.
pub fn filter_listings<'a>(items: &'a [PostSummary], query: &str) -> Vec<&'a PostSummary> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return items.iter().collect();
    }
    items
        .iter()
        .filter(|item| {
            item.title.to_lowercase().contains(&query)
                || item
                    .address_line()
                    .is_some_and(|address| address.to_lowercase().contains(&query))
        })
        .collect()
}

/// Whole-unit price with `.` thousands separators, e.g. `3.500.000`.
pub fn format_price(price: f64) -> String {
    let rounded = price.round();
    let digits = format!("{}", rounded.abs() as u64);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    if rounded < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
#[path = "tests/compare_tests.rs"]
mod tests;
