use crate::error::{ContextError, Result};
use crate::oracle::{MaskedLmOracle, MaskedSentence};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What to ask the oracle for every sentence.
#[derive(Debug, Clone)]
pub enum OracleRequest {
    TopK(usize),
    /// Candidate tokens per sentence, aligned with the sentence list.
    CandidateProbs(Arc<Vec<Vec<String>>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Substitutes(Vec<String>),
    Probabilities(Vec<f64>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub batches: usize,
    pub retried_batches: usize,
    pub failed_batches: usize,
    pub skipped_contexts: usize,
}

impl PoolStats {
    fn absorb(&mut self, other: Self) {
        self.batches += other.batches;
        self.retried_batches += other.retried_batches;
        self.failed_batches += other.failed_batches;
        self.skipped_contexts += other.skipped_contexts;
    }
}

struct BatchOutcome {
    results: Vec<(usize, Prediction)>,
    stats: PoolStats,
}

/// Scores every sentence through a bounded pool of batched oracle calls.
///
/// The returned vector is aligned with `sentences`; `None` marks a sentence whose batch
/// failed twice and was skipped.
pub async fn score_sentences(
    oracle: Arc<dyn MaskedLmOracle>,
    sentences: Arc<Vec<MaskedSentence>>,
    request: OracleRequest,
    batch_size: usize,
    max_in_flight: usize,
) -> Result<(Vec<Option<Prediction>>, PoolStats)> {
    if batch_size == 0 || max_in_flight == 0 {
        return Err(ContextError::invalid_config(
            "batch_size and max_in_flight must be positive",
        ));
    }
    if let OracleRequest::CandidateProbs(candidates) = &request {
        if candidates.len() != sentences.len() {
            return Err(ContextError::invalid_config(format!(
                "{} candidate lists for {} sentences",
                candidates.len(),
                sentences.len()
            )));
        }
    }

    let semaphore = Arc::new(Semaphore::new(max_in_flight));
    let mut tasks = JoinSet::new();
    let indices: Vec<usize> = (0..sentences.len()).collect();
    for chunk in indices.chunks(batch_size) {
        let chunk = chunk.to_vec();
        let oracle = oracle.clone();
        let sentences = sentences.clone();
        let request = request.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|err| ContextError::Other(err.to_string()))?;
            Ok::<_, ContextError>(run_batch(oracle.as_ref(), &sentences, &request, &chunk).await)
        });
    }

    let mut out: Vec<Option<Prediction>> = vec![None; sentences.len()];
    let mut stats = PoolStats::default();
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|err| ContextError::Other(format!("batch task: {err}")))??;
        stats.absorb(outcome.stats);
        for (idx, prediction) in outcome.results {
            out[idx] = Some(prediction);
        }
    }
    log::debug!(
        "Scored {} sentences in {} batches ({} retried, {} failed)",
        sentences.len(),
        stats.batches,
        stats.retried_batches,
        stats.failed_batches
    );
    Ok((out, stats))
}

/// One call, then on failure one retry per half of the batch.
async fn run_batch(
    oracle: &dyn MaskedLmOracle,
    sentences: &[MaskedSentence],
    request: &OracleRequest,
    chunk: &[usize],
) -> BatchOutcome {
    let mut stats = PoolStats {
        batches: 1,
        ..PoolStats::default()
    };
    let err = match call(oracle, sentences, request, chunk).await {
        Ok(preds) => {
            return BatchOutcome {
                results: chunk.iter().copied().zip(preds).collect(),
                stats,
            }
        }
        Err(err) => err,
    };

    log::warn!(
        "Oracle batch of {} failed ({err}); retrying with reduced batch size",
        chunk.len()
    );
    stats.retried_batches = 1;
    let half = chunk.len().div_ceil(2).max(1);
    let mut results = Vec::with_capacity(chunk.len());
    for part in chunk.chunks(half) {
        match call(oracle, sentences, request, part).await {
            Ok(preds) => results.extend(part.iter().copied().zip(preds)),
            Err(err) => {
                log::warn!(
                    "Oracle retry of {} contexts failed ({err}); skipping them",
                    part.len()
                );
                stats.failed_batches += 1;
                stats.skipped_contexts += part.len();
            }
        }
    }
    BatchOutcome { results, stats }
}

async fn call(
    oracle: &dyn MaskedLmOracle,
    sentences: &[MaskedSentence],
    request: &OracleRequest,
    part: &[usize],
) -> Result<Vec<Prediction>> {
    let batch: Vec<MaskedSentence> = part.iter().map(|&i| sentences[i].clone()).collect();
    match request {
        OracleRequest::TopK(k) => {
            let preds = oracle.top_k(&batch, *k).await?;
            ensure_len(part.len(), preds.len())?;
            Ok(preds.into_iter().map(Prediction::Substitutes).collect())
        }
        OracleRequest::CandidateProbs(all) => {
            let cands: Vec<Vec<String>> = part.iter().map(|&i| all[i].clone()).collect();
            let probs = oracle.candidate_probs(&batch, &cands).await?;
            ensure_len(part.len(), probs.len())?;
            for (p, c) in probs.iter().zip(&cands) {
                ensure_len(c.len(), p.len())?;
                if p.iter().any(|v| !v.is_finite()) {
                    return Err(ContextError::oracle("non-finite probability"));
                }
            }
            Ok(probs.into_iter().map(Prediction::Probabilities).collect())
        }
    }
}

fn ensure_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ContextError::OracleResponseMismatch { expected, actual })
    }
}
