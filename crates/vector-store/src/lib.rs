//! # Lexaxis Vector Store
//!
//! Term embedding aggregation, corpus statistics and the vector math shared by projection.
//!
//! ## Architecture
//!
//! ```text
//! <stem>.json + <stem>_wordcounts.json   (one pair per partition)
//!     │
//!     ├──> RawPartition ──> validated records (skips counted)
//!     │
//!     ├──> TermAccumulator per partition (parallel)
//!     │      └─> merge ──> finalize ──> {term: vector} | {term: {year: vector}}
//!     │
//!     └──> StatsAccumulator ──> StandardizationStats { mean, std }
//!            └─> standardize(vector)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use lexaxis_vector_store::{save_json, AggregationMode, EmbeddingAggregator, StandardizationStats};
//!
//! fn main() -> anyhow::Result<()> {
//!     let aggregation = EmbeddingAggregator::new(AggregationMode::Overall).aggregate_dir("embed")?;
//!     let stats = StandardizationStats::load("stats.json")?;
//!     let standardized = stats.standardize_table(&aggregation.overall())?;
//!     save_json("agg/overall_standardized.json", &standardized)?;
//!     Ok(())
//! }
//! ```

mod aggregate;
mod error;
mod math;
mod stats;
mod store;
mod types;

pub use aggregate::{Aggregation, AggregationReport, EmbeddingAggregator, TermAccumulator};
pub use error::{Result, VectorStoreError};
pub use math::{batch_cosine_distance, cosine_distance, cosine_similarity, l2_norm};
pub use stats::{StandardizationStats, StatsAccumulator, StatsReport};
pub use store::{
    discover_partitions, load_term_vectors, load_yearly_vectors, majority_width,
    resolve_dimension, save_json, PartitionSource, RawPartition, RawRecord, RecordSkips,
    TermVectors, YearlyTermVectors, MAX_ABS_VALUE,
};
pub use types::{AggregationMode, EmbeddingKey, GroupKey, PartitionKey, NO_YEAR};
