use crate::error::Result;
use crate::oracle::MaskedSentence;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusLine {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct CorpusLoad {
    pub lines: Vec<CorpusLine>,
    pub malformed: usize,
}

impl CorpusLoad {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading corpus from {:?}", path);
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse_str(&raw))
    }

    /// Parses `line_id \t text` records; further tabs belong to the text.
    #[must_use]
    pub fn parse_str(raw: &str) -> Self {
        let mut load = Self::default();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once('\t') {
                Some((id, text)) if !id.trim().is_empty() => load.lines.push(CorpusLine {
                    id: id.trim().to_string(),
                    text: text.to_string(),
                }),
                _ => load.malformed += 1,
            }
        }
        if load.malformed > 0 {
            log::warn!("Skipped {} malformed corpus lines", load.malformed);
        }
        load
    }
}

/// Where a masked word occurs. Ordering is the tie-break order for context ranking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextRef {
    pub document_id: String,
    pub sentence_id: usize,
    pub word: String,
}

#[derive(Debug, Clone)]
pub struct Occurrence {
    pub context: ContextRef,
    pub sentence: MaskedSentence,
}

#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Masks the first occurrence of every target word in every sentence of the corpus.
///
/// Multi-token targets (e.g. `well-known`) match as a contiguous token span and are
/// replaced by a single mask token.
#[must_use]
pub fn find_occurrences(
    lines: &[CorpusLine],
    targets: &BTreeSet<String>,
    mask_token: &str,
) -> Vec<Occurrence> {
    // first token -> [(word, word tokens)]
    let mut by_head: HashMap<String, Vec<(&str, Vec<String>)>> = HashMap::new();
    for word in targets {
        let tokens = tokenize(word);
        if let Some(head) = tokens.first().cloned() {
            by_head.entry(head).or_default().push((word.as_str(), tokens));
        }
    }

    let mut out = Vec::new();
    for line in lines {
        for (sentence_id, sentence) in line.text.unicode_sentences().enumerate() {
            let tokens = tokenize(sentence);
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for (i, token) in tokens.iter().enumerate() {
                let Some(candidates) = by_head.get(token) else {
                    continue;
                };
                for (word, span) in candidates {
                    if seen.contains(word) {
                        continue;
                    }
                    let end = i + span.len();
                    if end > tokens.len() || tokens[i..end] != span[..] {
                        continue;
                    }
                    seen.insert(*word);
                    let mut masked = Vec::with_capacity(tokens.len() + 1 - span.len());
                    masked.extend_from_slice(&tokens[..i]);
                    masked.push(mask_token.to_string());
                    masked.extend_from_slice(&tokens[end..]);
                    out.push(Occurrence {
                        context: ContextRef {
                            document_id: line.id.clone(),
                            sentence_id,
                            word: (*word).to_string(),
                        },
                        sentence: MaskedSentence {
                            tokens: masked,
                            mask_index: i,
                        },
                    });
                }
            }
        }
    }
    out
}
