//! Reference-set profile extraction
//!
//! Summarizes a set of reference products (e.g. a user's bookmarks) into
//! the primary accords and recurring tags that drive both the query
//! embedding and the diversity bonuses.

use crate::catalog::CandidateProduct;
use ahash::AHashMap;

/// How many primary accords to keep and what frequency ratio a tag must
/// reach to count as secondary, by reference-set size. Fewer references
/// means stricter thresholds.
pub fn threshold_values(reference_count: usize) -> (usize, f64) {
    if reference_count <= 3 {
        (1, 0.5)
    } else if reference_count <= 6 {
        (2, 0.4)
    } else if reference_count <= 10 {
        (3, 0.3)
    } else {
        (4, 0.2)
    }
}

/// Derived summary of a reference set
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// Top accords by frequency (ties by name), capped at the number of
    /// distinct accords present
    pub primary_tags: Vec<String>,
    /// Tags whose occurrence count reached `n * ratio`, ordered by
    /// frequency descending then name
    pub secondary_tags: Vec<String>,
}

impl Profile {
    /// Extract the profile from reference products
    pub fn from_reference(products: &[CandidateProduct]) -> Self {
        let mut accord_counts: AHashMap<&str, usize> = AHashMap::new();
        let mut tag_counts: AHashMap<&str, usize> = AHashMap::new();

        for product in products {
            *accord_counts.entry(product.main_accord.as_str()).or_insert(0) += 1;
            for tag in &product.tags {
                *tag_counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }

        let n = products.len();
        let (mut primary_count, ratio) = threshold_values(n);
        primary_count = primary_count.min(accord_counts.len());
        let min_occurrences = n as f64 * ratio;

        let mut accords: Vec<(&str, usize)> = accord_counts.into_iter().collect();
        accords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let primary_tags: Vec<String> = accords
            .into_iter()
            .take(primary_count)
            .map(|(accord, _)| accord.to_string())
            .collect();

        let mut tags: Vec<(&str, usize)> = tag_counts
            .into_iter()
            .filter(|(_, count)| *count as f64 >= min_occurrences)
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let secondary_tags: Vec<String> =
            tags.into_iter().map(|(tag, _)| tag.to_string()).collect();

        tracing::debug!(
            reference_count = n,
            primary = ?primary_tags,
            secondary = ?secondary_tags,
            min_occurrences,
            "Extracted reference profile"
        );

        Profile {
            primary_tags,
            secondary_tags,
        }
    }

    /// The text embedded to obtain the target vector
    pub fn query_text(&self) -> String {
        format!(
            "Main accords: {} Spices: {}",
            self.primary_tags.join(", "),
            self.secondary_tags.join(", ")
        )
    }

    pub fn is_empty(&self) -> bool {
        self.primary_tags.is_empty() && self.secondary_tags.is_empty()
    }
}
