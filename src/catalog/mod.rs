//! Candidate aggregation
//!
//! Joins raw product rows with their image URLs and attribute tags into
//! uniform candidate records. Rows come from whatever relational source
//! the surrounding application uses; [`SqliteCatalog`] is the built-in
//! source and expects these tables:
//!
//! ```sql
//! products(id INTEGER PRIMARY KEY, name TEXT, brand TEXT, main_accord TEXT)
//! product_images(product_id INTEGER, url TEXT)
//! product_tags(product_id INTEGER, tag TEXT)
//! ```

use ahash::AHashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog initialization failed: {0}")]
    InitializationError(String),

    #[error("Worker count {got} outside supported range 1..=4")]
    InvalidWorkers { got: usize },

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A product under consideration for ranking, built fresh per request
#[derive(Debug, Clone)]
pub struct CandidateProduct {
    pub id: u64,
    pub name: String,
    pub brand: String,
    pub main_accord: String,
    pub image_urls: Vec<String>,
    pub tags: BTreeSet<String>,
    /// Text representation used for embedding
    pub source_text: String,
}

impl CandidateProduct {
    pub fn new(
        id: u64,
        name: String,
        brand: String,
        main_accord: String,
        image_urls: Vec<String>,
        tags: BTreeSet<String>,
    ) -> Self {
        let source_text = derive_source_text(&main_accord, &tags);
        Self {
            id,
            name,
            brand,
            main_accord,
            image_urls,
            tags,
            source_text,
        }
    }
}

/// Text fed to the embedding model for a candidate. Tags are iterated in
/// sorted order so the same product always produces the same cache key.
fn derive_source_text(main_accord: &str, tags: &BTreeSet<String>) -> String {
    let tag_list: Vec<&str> = tags.iter().map(|s| s.as_str()).collect();
    format!(
        "Main accords: {} Spices: {}",
        main_accord,
        tag_list.join(", ")
    )
}

/// Raw product row as supplied by the data source
#[derive(Debug, Clone)]
pub struct ProductRow {
    pub id: u64,
    pub name: String,
    pub brand: String,
    pub main_accord: String,
}

/// Group product, image, and tag rows into candidate records
///
/// Output is ordered by product id ascending. Image order follows row
/// order with duplicates removed; tags are a set.
pub fn aggregate(
    products: Vec<ProductRow>,
    images: Vec<(u64, String)>,
    tags: Vec<(u64, String)>,
) -> Vec<CandidateProduct> {
    let mut images_by_id: AHashMap<u64, Vec<String>> = AHashMap::new();
    for (product_id, url) in images {
        let urls = images_by_id.entry(product_id).or_default();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    let mut tags_by_id: AHashMap<u64, BTreeSet<String>> = AHashMap::new();
    for (product_id, tag) in tags {
        tags_by_id.entry(product_id).or_default().insert(tag);
    }

    let mut candidates: Vec<CandidateProduct> = products
        .into_iter()
        .map(|row| {
            CandidateProduct::new(
                row.id,
                row.name,
                row.brand,
                row.main_accord,
                images_by_id.remove(&row.id).unwrap_or_default(),
                tags_by_id.remove(&row.id).unwrap_or_default(),
            )
        })
        .collect();

    candidates.sort_by_key(|c| c.id);
    candidates
}

/// SQLite-backed candidate source with a bounded connection pool
///
/// The three per-request queries (products, images, tags) fan out to
/// scoped worker threads; each worker takes its own pooled connection,
/// so at most `workers` connections are ever live.
pub struct SqliteCatalog {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteCatalog {
    pub fn new(db_path: &Path, workers: usize) -> Result<Self, CatalogError> {
        if !(1..=4).contains(&workers) {
            return Err(CatalogError::InvalidWorkers { got: workers });
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(workers as u32)
            .build(manager)
            .map_err(|e| CatalogError::InitializationError(e.to_string()))?;

        {
            let conn = pool
                .get()
                .map_err(|e| CatalogError::InitializationError(e.to_string()))?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        Ok(Self { pool })
    }

    /// Fetch every product not in `exclude`, aggregated into candidates
    pub fn fetch_candidates(&self, exclude: &[u64]) -> Result<Vec<CandidateProduct>, CatalogError> {
        let filter = format!(
            "WHERE {} NOT IN ({})",
            "{col}",
            placeholders(exclude.len())
        );
        self.fetch_filtered(&filter, exclude)
    }

    /// Fetch exactly the products in `ids` (the reference set)
    pub fn fetch_by_ids(&self, ids: &[u64]) -> Result<Vec<CandidateProduct>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = format!("WHERE {} IN ({})", "{col}", placeholders(ids.len()));
        self.fetch_filtered(&filter, ids)
    }

    fn fetch_filtered(
        &self,
        filter_template: &str,
        ids: &[u64],
    ) -> Result<Vec<CandidateProduct>, CatalogError> {
        let product_filter = if ids.is_empty() {
            String::new()
        } else {
            filter_template.replace("{col}", "id")
        };
        let assoc_filter = if ids.is_empty() {
            String::new()
        } else {
            filter_template.replace("{col}", "product_id")
        };

        let pool = &self.pool;
        let id_params: Vec<i64> = ids.iter().map(|id| *id as i64).collect();

        let (products, images, tags) = std::thread::scope(|scope| {
            let products = scope.spawn(|| -> Result<Vec<ProductRow>, CatalogError> {
                let conn = pool.get().map_err(|e| CatalogError::Pool(e.to_string()))?;
                let query = format!(
                    "SELECT id, name, brand, main_accord FROM products {} ORDER BY id",
                    product_filter
                );
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt
                    .query_map(params_from_iter(id_params.iter()), |row| {
                        Ok(ProductRow {
                            id: row.get::<_, i64>(0)? as u64,
                            name: row.get(1)?,
                            brand: row.get(2)?,
                            main_accord: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            });

            let images = scope.spawn(|| -> Result<Vec<(u64, String)>, CatalogError> {
                let conn = pool.get().map_err(|e| CatalogError::Pool(e.to_string()))?;
                let query = format!(
                    "SELECT product_id, url FROM product_images {}",
                    assoc_filter
                );
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt
                    .query_map(params_from_iter(id_params.iter()), |row| {
                        Ok((row.get::<_, i64>(0)? as u64, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            });

            let tags = scope.spawn(|| -> Result<Vec<(u64, String)>, CatalogError> {
                let conn = pool.get().map_err(|e| CatalogError::Pool(e.to_string()))?;
                let query =
                    format!("SELECT product_id, tag FROM product_tags {}", assoc_filter);
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt
                    .query_map(params_from_iter(id_params.iter()), |row| {
                        Ok((row.get::<_, i64>(0)? as u64, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            });

            let products = products.join().expect("catalog worker panicked");
            let images = images.join().expect("catalog worker panicked");
            let tags = tags.join().expect("catalog worker panicked");
            (products, images, tags)
        });

        Ok(aggregate(products?, images?, tags?))
    }
}

fn placeholders(n: usize) -> String {
    let mut s = String::new();
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}
