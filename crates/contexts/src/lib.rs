//! # Lexaxis Contexts
//!
//! Finds the sentence contexts in which a masked-language model separates the two poles of
//! a thesaurus axis.
//!
//! ## Pipeline
//!
//! ```text
//! corpus.tsv + Thesaurus
//!     │
//!     ├──> Occurrences (first match of each pole word per sentence, masked)
//!     │
//!     ├──> Batches ──> bounded worker pool ──> MaskedLmOracle
//!     │      └─> substitutes | candidate probabilities
//!     │
//!     └──> Selection policy
//!            └─> diagnostic contexts per axis side (+ rejected, fallback axes)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use lexaxis_axes::AxisBuilder;
//! use lexaxis_contexts::{ContextEvaluator, CorpusLoad, EvaluatorConfig, ModelId, StubOracle};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let thesaurus = AxisBuilder::load("wordnet_axes.txt")?;
//!     let corpus = CorpusLoad::load("corpus.tsv")?;
//!     let oracle = Arc::new(StubOracle::new(ModelId::BertBaseUncased));
//!
//!     let evaluator = ContextEvaluator::new(oracle, EvaluatorConfig::default())?;
//!     let selection = evaluator.evaluate(&thesaurus, &corpus).await?;
//!     println!("{} axes need fallback contexts", selection.needs_fallback.len());
//!     Ok(())
//! }
//! ```

mod batch;
mod corpus;
mod error;
mod evaluator;
mod oracle;
mod selection;

pub use batch::{score_sentences, OracleRequest, PoolStats, Prediction};
pub use corpus::{find_occurrences, tokenize, ContextRef, CorpusLine, CorpusLoad, Occurrence};
pub use error::{ContextError, Result};
pub use evaluator::{
    ContextEvaluator, ContextSelection, EvaluationReport, EvaluatorConfig, LineEntry,
    PoleContexts, SelectionPolicy, SingletonSubstitute,
};
pub use oracle::{MaskedLmOracle, MaskedSentence, ModelId, StubOracle};
pub use selection::{
    mean_mass, rank_by_probability, select_by_substitution, ContextMass, DiagnosticContext,
    Evidence, RejectedContext, SubstitutionOutcome,
};
