use crate::batch::{score_sentences, OracleRequest, PoolStats, Prediction};
use crate::corpus::{find_occurrences, ContextRef, CorpusLoad, Occurrence};
use crate::error::{ContextError, Result};
use crate::oracle::{MaskedLmOracle, MaskedSentence, ModelId};
use crate::selection::{
    mean_mass, rank_by_probability, select_by_substitution, ContextMass, DiagnosticContext,
    RejectedContext, SubstitutionOutcome,
};
use lexaxis_axes::{AxisId, PoleKey, Side, Thesaurus, WordLookup};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const SUBWORD_QUERY_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Top-K substitute overlap with synonym/antonym sets.
    #[default]
    Substitution,
    /// Mean synonym vs antonym probability over a closed candidate set.
    Probability,
}

impl FromStr for SelectionPolicy {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substitution" | "substitutes" => Ok(Self::Substitution),
            "probability" | "probs" => Ok(Self::Probability),
            other => Err(ContextError::invalid_config(format!(
                "unknown selection policy '{other}' (expected 'substitution' or 'probability')"
            ))),
        }
    }
}

/// Configuration for context evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub policy: SelectionPolicy,

    /// Substitutes requested per masked context (substitution policy)
    pub top_k: usize,

    /// Contexts kept per side after ranking by synonym probability
    pub top_n: usize,

    /// Contexts kept per side after ranking by synonym-antonym margin
    pub top_m: usize,

    /// Sentences per oracle call
    pub batch_size: usize,

    /// Oracle calls in flight at once
    pub max_in_flight: usize,

    /// Debug only: process just the first N axes (sorted by id) and log their contexts
    pub debug_inspect_first: Option<usize>,

    /// Keep raw substitute predictions for the prediction log
    pub keep_predictions: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::Substitution,
            top_k: 20,
            top_n: 200,
            top_m: 100,
            batch_size: 8,
            max_in_flight: 4,
            debug_inspect_first: None,
            keep_predictions: false,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("top_k", self.top_k),
            ("top_n", self.top_n),
            ("top_m", self.top_m),
            ("batch_size", self.batch_size),
            ("max_in_flight", self.max_in_flight),
        ] {
            if value == 0 {
                return Err(ContextError::invalid_config(format!("{name} must be positive")));
            }
        }
        if self.top_m > self.top_n {
            return Err(ContextError::invalid_config(format!(
                "top_m ({}) must not exceed top_n ({})",
                self.top_m, self.top_n
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoleContexts {
    pub pole: PoleKey,
    pub contexts: Vec<DiagnosticContext>,
}

/// The one synonym substitute that made a context acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingletonSubstitute {
    pub pole: PoleKey,
    #[serde(flatten)]
    pub context: ContextRef,
    pub substitute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub word: String,
    pub pole: PoleKey,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub corpus_lines: usize,
    pub malformed_corpus_lines: usize,
    pub pole_words: usize,
    pub excluded_multi_subword: usize,
    /// Pole words whose subword query failed twice; excluded like multi-subword words.
    pub subword_query_failed: usize,
    pub occurrences: usize,
    /// Occurrences without a single candidate substitute (probability policy).
    pub unscorable_occurrences: usize,
    /// `(occurrence, pole)` pairs with an empty synonym or antonym candidate set.
    pub unscorable_pole_contexts: usize,
    #[serde(flatten)]
    pub pool: PoolStats,
    pub accepted: usize,
    pub rejected: usize,
    pub axes_one_side_empty: usize,
    pub axes_both_sides_empty: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSelection {
    pub model: ModelId,
    pub policy: SelectionPolicy,
    pub poles: Vec<PoleContexts>,
    pub rejected: Vec<RejectedContext>,
    pub singletons: Vec<SingletonSubstitute>,
    /// `line id -> accepted (word, pole)` pairs, the shape downstream embedding passes read.
    pub lines: BTreeMap<String, Vec<LineEntry>>,
    /// Axes with a side that has no diagnostic context; these need generic sampled contexts.
    pub needs_fallback: Vec<AxisId>,
    pub report: EvaluationReport,
    #[serde(skip)]
    pub predictions: Vec<(ContextRef, Vec<String>)>,
}

impl ContextSelection {
    #[must_use]
    pub fn contexts(&self, pole: &PoleKey) -> &[DiagnosticContext] {
        self.poles
            .binary_search_by(|p| p.pole.cmp(pole))
            .map(|i| self.poles[i].contexts.as_slice())
            .unwrap_or_default()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `document_id \t sentence_id \t word \t substitute substitute ...`
    pub fn write_prediction_log(&self, mut out: impl Write) -> Result<()> {
        for (context, subs) in &self.predictions {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                context.document_id,
                context.sentence_id,
                context.word,
                subs.join(" ")
            )?;
        }
        Ok(())
    }
}

pub struct ContextEvaluator {
    oracle: Arc<dyn MaskedLmOracle>,
    config: EvaluatorConfig,
}

impl ContextEvaluator {
    pub fn new(oracle: Arc<dyn MaskedLmOracle>, config: EvaluatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { oracle, config })
    }

    #[must_use]
    pub const fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub async fn evaluate(
        &self,
        thesaurus: &Thesaurus,
        corpus: &CorpusLoad,
    ) -> Result<ContextSelection> {
        let model = self.oracle.model();
        let inspected = self.inspected_poles(thesaurus);
        let lookup = thesaurus.lookup();
        let mut report = EvaluationReport {
            corpus_lines: corpus.lines.len(),
            malformed_corpus_lines: corpus.malformed,
            ..EvaluationReport::default()
        };

        let pole_words: Vec<String> = lookup
            .iter()
            .filter(|(_, senses)| senses.keys().any(|k| inspected.contains(k)))
            .map(|(w, _)| w.clone())
            .collect();
        let (single, failed) = self.single_subword_words(&pole_words).await;
        report.pole_words = pole_words.len();
        report.subword_query_failed = failed;
        report.excluded_multi_subword = pole_words.len() - single.len() - failed;
        if report.excluded_multi_subword > 0 {
            log::info!(
                "Excluding {} pole words that split into several subword units",
                report.excluded_multi_subword
            );
        }

        let occurrences = find_occurrences(&corpus.lines, &single, model.mask_token());
        report.occurrences = occurrences.len();
        log::info!(
            "Scoring {} occurrences of {} pole words with {} ({:?} policy)",
            occurrences.len(),
            single.len(),
            model,
            self.config.policy
        );

        let mut predictions = Vec::new();
        let (mut accepted, rejected) = match self.config.policy {
            SelectionPolicy::Substitution => {
                let (outcome, stats, raw) = self
                    .run_substitution(&occurrences, &lookup, &inspected)
                    .await?;
                report.pool = stats;
                if self.config.keep_predictions {
                    predictions = raw;
                }
                (outcome.accepted, outcome.rejected)
            }
            SelectionPolicy::Probability => {
                let run = self
                    .run_probability(&occurrences, &lookup, &inspected, &single)
                    .await?;
                report.pool = run.pool;
                report.unscorable_occurrences = run.unscorable_occurrences;
                report.unscorable_pole_contexts = run.unscorable_pole_contexts;
                (run.accepted, Vec::new())
            }
        };

        let mut poles = Vec::with_capacity(inspected.len());
        let mut singletons = Vec::new();
        let mut lines: BTreeMap<String, Vec<LineEntry>> = BTreeMap::new();
        for pole in &inspected {
            let contexts = accepted.remove(pole).unwrap_or_default();
            for diag in &contexts {
                if let Some(sub) = diag.singleton() {
                    singletons.push(SingletonSubstitute {
                        pole: pole.clone(),
                        context: diag.context.clone(),
                        substitute: sub.to_string(),
                    });
                }
                lines
                    .entry(diag.context.document_id.clone())
                    .or_default()
                    .push(LineEntry {
                        word: diag.context.word.clone(),
                        pole: pole.clone(),
                    });
            }
            if self.config.debug_inspect_first.is_some() {
                for diag in &contexts {
                    log::debug!("{pole}: {:?} {:?}", diag.context, diag.evidence);
                }
            }
            report.accepted += contexts.len();
            poles.push(PoleContexts {
                pole: pole.clone(),
                contexts,
            });
        }
        report.rejected = rejected.len();

        let needs_fallback = fallback_axes(&poles, &mut report);
        log::info!(
            "Selected {} diagnostic contexts ({} rejected); {} axes need fallback contexts",
            report.accepted,
            report.rejected,
            needs_fallback.len()
        );

        Ok(ContextSelection {
            model,
            policy: self.config.policy,
            poles,
            rejected,
            singletons,
            lines,
            needs_fallback,
            report,
            predictions,
        })
    }

    fn inspected_poles(&self, thesaurus: &Thesaurus) -> BTreeSet<PoleKey> {
        match self.config.debug_inspect_first {
            Some(n) => {
                log::warn!("debug_inspect_first={n}: only the first {n} axes are evaluated");
                thesaurus
                    .axes()
                    .take(n)
                    .flat_map(|axis| Side::BOTH.map(|side| PoleKey::new(axis.id.clone(), side)))
                    .collect()
            }
            None => thesaurus.pole_keys().collect(),
        }
    }

    /// Words that map to a single subword unit, plus the number of words whose query
    /// failed on retry. Failed chunks are skipped, never fatal.
    async fn single_subword_words(&self, words: &[String]) -> (BTreeSet<String>, usize) {
        let mut single = BTreeSet::new();
        let mut failed = 0;
        for chunk in words.chunks(SUBWORD_QUERY_CHUNK) {
            let counts = match self.subword_counts(chunk).await {
                Ok(counts) => counts,
                Err(err) => {
                    log::warn!("Subword query failed ({err}); retrying once");
                    match self.subword_counts(chunk).await {
                        Ok(counts) => counts,
                        Err(err) => {
                            log::warn!(
                                "Subword retry for {} words failed ({err}); excluding them",
                                chunk.len()
                            );
                            failed += chunk.len();
                            continue;
                        }
                    }
                }
            };
            single.extend(
                chunk
                    .iter()
                    .zip(counts)
                    .filter(|(_, n)| *n == 1)
                    .map(|(w, _)| w.clone()),
            );
        }
        (single, failed)
    }

    async fn subword_counts(&self, chunk: &[String]) -> Result<Vec<usize>> {
        let counts = self.oracle.subword_counts(chunk).await?;
        if counts.len() != chunk.len() {
            return Err(ContextError::OracleResponseMismatch {
                expected: chunk.len(),
                actual: counts.len(),
            });
        }
        Ok(counts)
    }

    async fn run_substitution(
        &self,
        occurrences: &[Occurrence],
        lookup: &WordLookup,
        inspected: &BTreeSet<PoleKey>,
    ) -> Result<(SubstitutionOutcome, PoolStats, Vec<(ContextRef, Vec<String>)>)> {
        let sentences: Arc<Vec<MaskedSentence>> =
            Arc::new(occurrences.iter().map(|o| o.sentence.clone()).collect());
        let (preds, stats) = score_sentences(
            self.oracle.clone(),
            sentences,
            OracleRequest::TopK(self.config.top_k),
            self.config.batch_size,
            self.config.max_in_flight,
        )
        .await?;

        let k = self.config.top_k;
        let scored: Vec<(&ContextRef, &[String])> = occurrences
            .iter()
            .zip(&preds)
            .filter_map(|(occ, pred)| match pred {
                Some(Prediction::Substitutes(subs)) => {
                    Some((&occ.context, &subs[..subs.len().min(k)]))
                }
                _ => None,
            })
            .collect();
        let outcome = select_by_substitution(scored.iter().copied(), lookup, inspected);
        let raw = if self.config.keep_predictions {
            scored
                .iter()
                .map(|(ctx, subs)| ((*ctx).clone(), subs.to_vec()))
                .collect()
        } else {
            Vec::new()
        };
        Ok((outcome, stats, raw))
    }

    async fn run_probability(
        &self,
        occurrences: &[Occurrence],
        lookup: &WordLookup,
        inspected: &BTreeSet<PoleKey>,
        single: &BTreeSet<String>,
    ) -> Result<ProbabilityRun> {
        let mut scorable: Vec<&Occurrence> = Vec::new();
        let mut candidates: Vec<Vec<String>> = Vec::new();
        let mut unscorable_occurrences = 0;
        let mut unscorable_pole_contexts = 0;
        for occ in occurrences {
            let mut cands: BTreeSet<&String> = BTreeSet::new();
            if let Some(senses) = lookup.get(&occ.context.word) {
                for (pole, sense) in senses {
                    if inspected.contains(pole) {
                        cands.extend(
                            sense
                                .synonyms
                                .iter()
                                .chain(&sense.antonyms)
                                .filter(|w| single.contains(*w)),
                        );
                    }
                }
            }
            if cands.is_empty() {
                unscorable_occurrences += 1;
                continue;
            }
            scorable.push(occ);
            candidates.push(cands.into_iter().cloned().collect());
        }

        let sentences: Arc<Vec<MaskedSentence>> =
            Arc::new(scorable.iter().map(|o| o.sentence.clone()).collect());
        let candidates = Arc::new(candidates);
        let (preds, stats) = score_sentences(
            self.oracle.clone(),
            sentences,
            OracleRequest::CandidateProbs(candidates.clone()),
            self.config.batch_size,
            self.config.max_in_flight,
        )
        .await?;

        let mut masses: BTreeMap<PoleKey, Vec<ContextMass>> = BTreeMap::new();
        for ((occ, cands), pred) in scorable.iter().zip(candidates.iter()).zip(&preds) {
            let Some(Prediction::Probabilities(probs)) = pred else {
                continue;
            };
            let Some(senses) = lookup.get(&occ.context.word) else {
                continue;
            };
            for (pole, sense) in senses {
                if !inspected.contains(pole) {
                    continue;
                }
                let syn = mean_mass(&sense.synonyms, cands, probs);
                let ant = mean_mass(&sense.antonyms, cands, probs);
                match (syn, ant) {
                    (Some(synonym_mass), Some(antonym_mass)) => {
                        masses.entry(pole.clone()).or_default().push(ContextMass {
                            context: occ.context.clone(),
                            synonym_mass,
                            antonym_mass,
                        });
                    }
                    _ => unscorable_pole_contexts += 1,
                }
            }
        }

        let accepted = masses
            .into_iter()
            .map(|(pole, m)| (pole, rank_by_probability(m, self.config.top_n, self.config.top_m)))
            .collect();
        Ok(ProbabilityRun {
            accepted,
            pool: stats,
            unscorable_occurrences,
            unscorable_pole_contexts,
        })
    }
}

struct ProbabilityRun {
    accepted: BTreeMap<PoleKey, Vec<DiagnosticContext>>,
    pool: PoolStats,
    unscorable_occurrences: usize,
    unscorable_pole_contexts: usize,
}

fn fallback_axes(poles: &[PoleContexts], report: &mut EvaluationReport) -> Vec<AxisId> {
    let mut sides: BTreeMap<&AxisId, [bool; 2]> = BTreeMap::new();
    for p in poles {
        let slot = usize::from(p.pole.side == Side::Right);
        sides.entry(&p.pole.axis).or_default()[slot] = !p.contexts.is_empty();
    }
    let mut out = Vec::new();
    for (axis, [left, right]) in sides {
        if left && right {
            continue;
        }
        if !left && !right {
            report.axes_both_sides_empty += 1;
        } else {
            report.axes_one_side_empty += 1;
        }
        log::debug!("axis {axis} needs fallback contexts (left: {left}, right: {right})");
        out.push(axis.clone());
    }
    out
}
