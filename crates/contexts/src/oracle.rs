use crate::error::{ContextError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Masked-LM architectures the oracle may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelId {
    #[default]
    BertBaseUncased,
    BertLargeUncased,
    RobertaBase,
}

impl ModelId {
    pub const ALL: [ModelId; 3] = [
        ModelId::BertBaseUncased,
        ModelId::BertLargeUncased,
        ModelId::RobertaBase,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BertBaseUncased => "bert-base-uncased",
            Self::BertLargeUncased => "bert-large-uncased",
            Self::RobertaBase => "roberta-base",
        }
    }

    #[must_use]
    pub const fn mask_token(self) -> &'static str {
        match self {
            Self::BertBaseUncased | Self::BertLargeUncased => "[MASK]",
            Self::RobertaBase => "<mask>",
        }
    }
}

impl Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == raw)
            .ok_or_else(|| ContextError::UnsupportedModel(s.to_string()))
    }
}

/// A tokenized sentence with one word span replaced by the model's mask token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedSentence {
    pub tokens: Vec<String>,
    pub mask_index: usize,
}

impl MaskedSentence {
    #[must_use]
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }

    /// Tokens other than the mask.
    pub fn context_tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.mask_index)
            .map(|(_, t)| t.as_str())
    }
}

/// The masked-language model, consumed as an opaque scoring capability.
///
/// Every batch method must return exactly one entry per input sentence, in input order.
#[async_trait]
pub trait MaskedLmOracle: Send + Sync {
    fn model(&self) -> ModelId;

    /// Number of subword units each word splits into under the model vocabulary.
    async fn subword_counts(&self, words: &[String]) -> Result<Vec<usize>>;

    /// Top-`k` substitute tokens for the mask position, most probable first.
    async fn top_k(&self, batch: &[MaskedSentence], k: usize) -> Result<Vec<Vec<String>>>;

    /// Probability of each caller-specified candidate at the mask position.
    /// `candidates[i]` belongs to `batch[i]`; the answer is aligned with it.
    async fn candidate_probs(
        &self,
        batch: &[MaskedSentence],
        candidates: &[Vec<String>],
    ) -> Result<Vec<Vec<f64>>>;
}

/// Deterministic offline oracle: predicts the sentence's own context words.
///
/// Words containing non-alphanumeric characters split into one unit per alphanumeric run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubOracle {
    model: ModelId,
}

impl StubOracle {
    #[must_use]
    pub const fn new(model: ModelId) -> Self {
        Self { model }
    }
}

#[async_trait]
impl MaskedLmOracle for StubOracle {
    fn model(&self) -> ModelId {
        self.model
    }

    async fn subword_counts(&self, words: &[String]) -> Result<Vec<usize>> {
        Ok(words
            .iter()
            .map(|w| {
                w.split(|c: char| !c.is_alphanumeric())
                    .filter(|part| !part.is_empty())
                    .count()
                    .max(1)
            })
            .collect())
    }

    async fn top_k(&self, batch: &[MaskedSentence], k: usize) -> Result<Vec<Vec<String>>> {
        Ok(batch
            .iter()
            .map(|sentence| {
                let mut seen = Vec::new();
                for token in sentence.context_tokens() {
                    if seen.len() == k {
                        break;
                    }
                    if !seen.iter().any(|s: &String| s == token) {
                        seen.push(token.to_string());
                    }
                }
                seen
            })
            .collect())
    }

    async fn candidate_probs(
        &self,
        batch: &[MaskedSentence],
        candidates: &[Vec<String>],
    ) -> Result<Vec<Vec<f64>>> {
        if batch.len() != candidates.len() {
            return Err(ContextError::OracleResponseMismatch {
                expected: batch.len(),
                actual: candidates.len(),
            });
        }
        Ok(batch
            .iter()
            .zip(candidates)
            .map(|(sentence, cands)| {
                let total = sentence.context_tokens().count().max(1) as f64;
                cands
                    .iter()
                    .map(|c| {
                        let hits = sentence
                            .context_tokens()
                            .filter(|t| *t == c.as_str())
                            .count();
                        hits as f64 / total
                    })
                    .collect()
            })
            .collect())
    }
}
