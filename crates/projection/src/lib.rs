//! # Lexaxis Projection
//!
//! Projects term vectors onto the axes that passed quality filtering.
//!
//! Each axis direction is `right_centroid - left_centroid` (not normalized). A term's score
//! is its cosine distance to that direction, in `[0, 2]`: larger means farther from the
//! right pole.
//!
//! ## Example
//!
//! ```no_run
//! use lexaxis_axes::{AxisBuilder, QualityReport};
//! use lexaxis_projection::{load_pole_vectors, AxisProjector, PoleSet, VocabularyOrder};
//! use lexaxis_vector_store::{load_term_vectors, StandardizationStats};
//!
//! fn main() -> anyhow::Result<()> {
//!     let thesaurus = AxisBuilder::load("wordnet_axes.txt")?;
//!     let quality = QualityReport::load("quality.json")?;
//!     let stats = StandardizationStats::load("stats.json")?;
//!
//!     let poles = PoleSet::build(&load_pole_vectors("poles.json")?, &thesaurus, Some(&stats))?;
//!     let terms = load_term_vectors("overall.json")?;
//!     let (vocabulary, reused) =
//!         VocabularyOrder::resolve("results/vocab_order.txt", &terms.keys().cloned().collect())?;
//!
//!     let projection = AxisProjector::new(&thesaurus, &quality)
//!         .project(&poles, &terms, Some(&stats), vocabulary, reused)?;
//!     projection.save("results")?;
//!     Ok(())
//! }
//! ```

mod error;
mod poles;
mod projector;
mod vocab;

pub use error::{ProjectionError, Result};
pub use poles::{load_pole_vectors, AxisPole, PoleReport, PoleSet, PoleVector};
pub use projector::{
    AxisProjector, AxisScores, Projection, ProjectionReport, SCORES_FILE, VOCAB_ORDER_FILE,
};
pub use vocab::VocabularyOrder;
