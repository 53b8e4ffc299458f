//! Taste-profile extraction and similarity/diversity ranking

mod profile;
mod ranker;
mod similar;

pub use profile::{threshold_values, Profile};
pub use ranker::{cosine_similarity, RankError, RankedResult, Ranker};
pub use similar::{similar_by_image, similar_by_text, ProductText, SimilarHit};
