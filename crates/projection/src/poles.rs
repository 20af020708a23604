use crate::error::{ProjectionError, Result};
use lexaxis_axes::{AxisId, PoleKey, Side, Thesaurus};
use lexaxis_vector_store::StandardizationStats;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Contextual vector of one pole word, taken from one of its diagnostic contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoleVector {
    pub axis_id: AxisId,
    pub side: Side,
    pub word: String,
    pub vector: Vec<f64>,
}

pub fn load_pole_vectors(path: impl AsRef<Path>) -> Result<Vec<PoleVector>> {
    let path = path.as_ref();
    log::info!("Loading pole vectors from {:?}", path);
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Clone)]
pub struct AxisPole {
    pub key: PoleKey,
    /// Pole words that contributed at least one vector.
    pub members: Vec<String>,
    pub centroid: Array1<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoleReport {
    pub vectors: usize,
    pub unknown_axis: usize,
    pub not_a_member: usize,
    pub non_finite: usize,
    pub poles: usize,
}

/// Centroids for every axis side that has vectors.
#[derive(Debug, Clone, Default)]
pub struct PoleSet {
    poles: BTreeMap<PoleKey, AxisPole>,
    dimension: Option<usize>,
    report: PoleReport,
}

impl PoleSet {
    /// Groups vectors by pole, averages per word, then averages the words.
    ///
    /// Vectors for axes missing from `thesaurus`, or for words not on the named side, are
    /// skipped and counted. With `stats`, every vector is standardized first.
    pub fn build(
        vectors: &[PoleVector],
        thesaurus: &Thesaurus,
        stats: Option<&StandardizationStats>,
    ) -> Result<Self> {
        let mut report = PoleReport {
            vectors: vectors.len(),
            ..PoleReport::default()
        };
        let mut dimension: Option<usize> = None;
        // pole -> word -> (sum, n)
        let mut sums: BTreeMap<PoleKey, BTreeMap<&str, (Array1<f64>, usize)>> = BTreeMap::new();
        for pv in vectors {
            let Some(axis) = thesaurus.axis(&pv.axis_id) else {
                report.unknown_axis += 1;
                continue;
            };
            if !axis.pole(pv.side).contains(&pv.word) {
                report.not_a_member += 1;
                continue;
            }
            if pv.vector.iter().any(|v| !v.is_finite()) {
                report.non_finite += 1;
                continue;
            }
            let expected = *dimension.get_or_insert(pv.vector.len());
            if pv.vector.len() != expected {
                return Err(ProjectionError::InvalidDimension {
                    expected,
                    actual: pv.vector.len(),
                });
            }
            let vector = match stats {
                Some(stats) => stats.standardize(&pv.vector)?,
                None => Array1::from(pv.vector.clone()),
            };
            let entry = sums
                .entry(PoleKey::new(pv.axis_id.clone(), pv.side))
                .or_default()
                .entry(pv.word.as_str())
                .or_insert_with(|| (Array1::zeros(expected), 0));
            entry.0 += &vector;
            entry.1 += 1;
        }

        let mut poles = BTreeMap::new();
        for (key, words) in sums {
            let mut centroid = Array1::zeros(dimension.unwrap_or(0));
            let mut members = Vec::with_capacity(words.len());
            for (word, (sum, n)) in &words {
                centroid += &(sum / *n as f64);
                members.push((*word).to_string());
            }
            centroid /= words.len() as f64;
            poles.insert(
                key.clone(),
                AxisPole {
                    key,
                    members,
                    centroid,
                },
            );
        }
        report.poles = poles.len();
        let skipped = report.unknown_axis + report.not_a_member + report.non_finite;
        if skipped > 0 {
            log::warn!(
                "Skipped {} of {} pole vectors ({} unknown axis, {} not a pole member, {} non-finite)",
                skipped,
                report.vectors,
                report.unknown_axis,
                report.not_a_member,
                report.non_finite
            );
        }
        Ok(Self {
            poles,
            dimension,
            report,
        })
    }

    #[must_use]
    pub fn get(&self, key: &PoleKey) -> Option<&AxisPole> {
        self.poles.get(key)
    }

    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub const fn report(&self) -> &PoleReport {
        &self.report
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.poles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.poles.is_empty()
    }
}
