//! # Lexaxis Axes
//!
//! Bipolar word-sense axes built from a thesaurus, plus the probe-based filter that decides
//! which axes are trustworthy enough to project onto.
//!
//! ## Pipeline
//!
//! ```text
//! thesaurus.tsv
//!     │
//!     ├──> AxisBuilder
//!     │      └─> Thesaurus (axes + per-word synonym/antonym lookup)
//!     │
//!     └──> AxisQualityFilter (probe scores)
//!            └─> accepted axis ids
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use lexaxis_axes::{AxisBuilder, AxisQualityFilter};
//!
//! fn main() -> lexaxis_axes::Result<()> {
//!     let thesaurus = AxisBuilder::load("wordnet_axes.txt")?;
//!     let lookup = thesaurus.lookup();
//!     println!("{} axes, {} words", thesaurus.len(), lookup.len());
//!
//!     let probes = AxisQualityFilter::load_probes("axes_quality.txt")?;
//!     let report = AxisQualityFilter::evaluate(&probes.scores);
//!     println!("{} accepted", report.accepted.len());
//!     Ok(())
//! }
//! ```

mod error;
mod quality;
mod thesaurus;
mod types;

pub use error::{AxesError, Result};
pub use quality::{AxisQualityFilter, ProbeLoad, ProbeScore, QualityReport, SideScores};
pub use thesaurus::{AxisBuilder, Thesaurus, ThesaurusReport, WordLookup, WordSenses};
pub use types::{Axis, AxisId, PoleKey, Side};
