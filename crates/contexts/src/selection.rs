//! Context selection policies.
//!
//! Both policies turn oracle predictions for masked pole-word occurrences into an ordered
//! list of diagnostic contexts per axis side.

use crate::corpus::ContextRef;
use lexaxis_axes::{PoleKey, WordLookup};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Why a context was kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Substitutes { matched: BTreeSet<String> },
    Probability { synonym_mass: f64, antonym_mass: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticContext {
    #[serde(flatten)]
    pub context: ContextRef,
    pub evidence: Evidence,
}

impl DiagnosticContext {
    /// The sole synonym substitute responsible for acceptance, if exactly one matched.
    #[must_use]
    pub fn singleton(&self) -> Option<&str> {
        match &self.evidence {
            Evidence::Substitutes { matched } if matched.len() == 1 => {
                matched.iter().next().map(String::as_str)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn overlap(&self) -> Option<usize> {
        match &self.evidence {
            Evidence::Substitutes { matched } => Some(matched.len()),
            Evidence::Probability { .. } => None,
        }
    }
}

/// A context whose substitutes included an antonym of the masked word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedContext {
    #[serde(flatten)]
    pub context: ContextRef,
    pub pole: PoleKey,
    pub conflicting: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct SubstitutionOutcome {
    pub accepted: BTreeMap<PoleKey, Vec<DiagnosticContext>>,
    pub rejected: Vec<RejectedContext>,
}

/// Substitution-overlap policy.
///
/// For every side the masked word belongs to: any antonym among the predictions rejects the
/// context; otherwise a non-empty synonym overlap accepts it. Accepted lists are ordered by
/// overlap size descending, then by context.
pub fn select_by_substitution<'a>(
    scored: impl IntoIterator<Item = (&'a ContextRef, &'a [String])>,
    lookup: &WordLookup,
    poles: &BTreeSet<PoleKey>,
) -> SubstitutionOutcome {
    let mut outcome = SubstitutionOutcome::default();
    for (context, predictions) in scored {
        let Some(senses) = lookup.get(&context.word) else {
            continue;
        };
        let predicted: BTreeSet<&str> = predictions.iter().map(String::as_str).collect();
        for (pole, sense) in senses {
            if !poles.contains(pole) {
                continue;
            }
            let conflicting: BTreeSet<String> = sense
                .antonyms
                .iter()
                .filter(|w| predicted.contains(w.as_str()))
                .cloned()
                .collect();
            if !conflicting.is_empty() {
                outcome.rejected.push(RejectedContext {
                    context: context.clone(),
                    pole: pole.clone(),
                    conflicting,
                });
                continue;
            }
            let matched: BTreeSet<String> = sense
                .synonyms
                .iter()
                .filter(|w| predicted.contains(w.as_str()))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            outcome
                .accepted
                .entry(pole.clone())
                .or_default()
                .push(DiagnosticContext {
                    context: context.clone(),
                    evidence: Evidence::Substitutes { matched },
                });
        }
    }
    for contexts in outcome.accepted.values_mut() {
        contexts.sort_by(|a, b| {
            b.overlap()
                .cmp(&a.overlap())
                .then_with(|| a.context.cmp(&b.context))
        });
    }
    outcome.rejected.sort_by(|a, b| {
        a.pole
            .cmp(&b.pole)
            .then_with(|| a.context.cmp(&b.context))
    });
    outcome
}

/// Mean synonym and antonym probability of one context for one side.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMass {
    pub context: ContextRef,
    pub synonym_mass: f64,
    pub antonym_mass: f64,
}

impl ContextMass {
    fn margin(&self) -> f64 {
        self.synonym_mass - self.antonym_mass
    }
}

/// Probability-score policy for one side: keep the `top_n` contexts with the highest mean
/// synonym probability, then the `top_m` of those with the widest synonym–antonym margin.
/// Ties fall back to context order.
#[must_use]
pub fn rank_by_probability(
    mut masses: Vec<ContextMass>,
    top_n: usize,
    top_m: usize,
) -> Vec<DiagnosticContext> {
    masses.sort_by(|a, b| by_score_desc(a.synonym_mass, b.synonym_mass, &a.context, &b.context));
    masses.truncate(top_n);
    masses.sort_by(|a, b| by_score_desc(a.margin(), b.margin(), &a.context, &b.context));
    masses.truncate(top_m);
    masses
        .into_iter()
        .map(|m| DiagnosticContext {
            context: m.context,
            evidence: Evidence::Probability {
                synonym_mass: m.synonym_mass,
                antonym_mass: m.antonym_mass,
            },
        })
        .collect()
}

fn by_score_desc(a: f64, b: f64, ca: &ContextRef, cb: &ContextRef) -> Ordering {
    b.total_cmp(&a).then_with(|| ca.cmp(cb))
}

/// Mean of the probabilities assigned to `members`, looked up by candidate position.
/// `None` when no member is among the candidates.
#[must_use]
pub fn mean_mass(
    members: &BTreeSet<String>,
    candidates: &[String],
    probabilities: &[f64],
) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for (cand, p) in candidates.iter().zip(probabilities) {
        if members.contains(cand) {
            sum += p;
            n += 1;
        }
    }
    (n > 0).then(|| sum / n as f64)
}
