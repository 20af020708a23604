use crate::error::{ProjectionError, Result};
use crate::poles::{PoleReport, PoleSet};
use crate::vocab::VocabularyOrder;
use lexaxis_axes::{AxisId, PoleKey, QualityReport, Side, Thesaurus};
use lexaxis_vector_store::{
    batch_cosine_distance, l2_norm, StandardizationStats, TermVectors,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const SCORES_FILE: &str = "scores.json";
pub const VOCAB_ORDER_FILE: &str = "vocab_order.txt";

/// `{axis_id: [score per term, aligned to the vocabulary order]}`
pub type AxisScores = BTreeMap<AxisId, Vec<f64>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionReport {
    pub terms: usize,
    pub reused_vocabulary: bool,
    pub accepted_axes: usize,
    pub projected_axes: usize,
    pub not_in_thesaurus: Vec<AxisId>,
    pub empty_pole: Vec<AxisId>,
    pub zero_direction: Vec<AxisId>,
    pub poles: PoleReport,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub vocabulary: VocabularyOrder,
    pub scores: AxisScores,
    pub report: ProjectionReport,
}

impl Projection {
    /// Writes `scores.json` and `vocab_order.txt` into `dir`.
    ///
    /// Both files are staged as temporaries first; nothing is renamed into place unless
    /// both writes succeed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let scores_path = dir.join(SCORES_FILE);
        let vocab_path = dir.join(VOCAB_ORDER_FILE);
        let scores_tmp = scores_path.with_extension("json.tmp");
        let vocab_tmp = vocab_path.with_extension("txt.tmp");
        std::fs::write(&scores_tmp, serde_json::to_vec(&self.scores)?)?;
        if let Err(err) = std::fs::write(&vocab_tmp, self.vocabulary.to_text()) {
            let _ = std::fs::remove_file(&scores_tmp);
            return Err(err.into());
        }
        std::fs::rename(&vocab_tmp, &vocab_path)?;
        std::fs::rename(&scores_tmp, &scores_path)?;
        log::info!(
            "Wrote {} axes x {} terms to {:?}",
            self.scores.len(),
            self.vocabulary.len(),
            dir
        );
        Ok(())
    }
}

/// Scores every term against every accepted axis by cosine distance to the axis direction.
pub struct AxisProjector<'a> {
    thesaurus: &'a Thesaurus,
    quality: &'a QualityReport,
}

impl<'a> AxisProjector<'a> {
    #[must_use]
    pub const fn new(thesaurus: &'a Thesaurus, quality: &'a QualityReport) -> Self {
        Self { thesaurus, quality }
    }

    /// Projects `terms` (standardized with `stats` when given) onto every usable axis.
    ///
    /// `vocabulary` must cover exactly the keys of `terms`. Nothing is written; call
    /// [`Projection::save`] once this returns.
    pub fn project(
        &self,
        poles: &PoleSet,
        terms: &TermVectors,
        stats: Option<&StandardizationStats>,
        vocabulary: VocabularyOrder,
        reused_vocabulary: bool,
    ) -> Result<Projection> {
        let term_set: BTreeSet<String> = terms.keys().cloned().collect();
        vocabulary.ensure_same_terms(&term_set)?;

        let rows = self.rows(terms, stats, &vocabulary, poles.dimension())?;

        let mut report = ProjectionReport {
            terms: vocabulary.len(),
            reused_vocabulary,
            accepted_axes: self.quality.accepted.len(),
            poles: poles.report().clone(),
            ..ProjectionReport::default()
        };
        let mut directions = Vec::new();
        for axis_id in &self.quality.accepted {
            if self.thesaurus.axis(axis_id).is_none() {
                log::warn!("Accepted axis {axis_id} is not in the thesaurus; skipped");
                report.not_in_thesaurus.push(axis_id.clone());
                continue;
            }
            let left = poles.get(&PoleKey::new(axis_id.clone(), Side::Left));
            let right = poles.get(&PoleKey::new(axis_id.clone(), Side::Right));
            let (Some(left), Some(right)) = (left, right) else {
                log::warn!("Axis {axis_id} has a pole without vectors; dropped");
                report.empty_pole.push(axis_id.clone());
                continue;
            };
            let direction = (&right.centroid - &left.centroid).to_vec();
            if l2_norm(&direction) == 0.0 {
                log::warn!("Axis {axis_id} has identical pole centroids; dropped");
                report.zero_direction.push(axis_id.clone());
                continue;
            }
            directions.push((axis_id.clone(), direction));
        }

        let scored: Vec<(AxisId, Vec<f64>)> = directions
            .into_par_iter()
            .map(|(axis_id, direction)| {
                let scores = batch_cosine_distance(&direction, &rows);
                (axis_id, scores)
            })
            .collect();

        let mut scores = AxisScores::new();
        for (axis_id, list) in scored {
            if list.len() != vocabulary.len() {
                return Err(ProjectionError::ScoreLengthMismatch {
                    axis: axis_id.to_string(),
                    expected: vocabulary.len(),
                    actual: list.len(),
                });
            }
            scores.insert(axis_id, list);
        }
        report.projected_axes = scores.len();
        log::info!(
            "Projected {} terms onto {} of {} accepted axes",
            report.terms,
            report.projected_axes,
            report.accepted_axes
        );
        Ok(Projection {
            vocabulary,
            scores,
            report,
        })
    }

    /// Term rows in vocabulary order. Every width is checked before any scoring.
    fn rows(
        &self,
        terms: &TermVectors,
        stats: Option<&StandardizationStats>,
        vocabulary: &VocabularyOrder,
        pole_dimension: Option<usize>,
    ) -> Result<Vec<Vec<f64>>> {
        let mut expected = stats.map(|s| s.dimension).or(pole_dimension);
        if let (Some(stats), Some(poles)) = (stats, pole_dimension) {
            stats.check_dimension(poles)?;
        }
        let mut rows = Vec::with_capacity(vocabulary.len());
        for term in vocabulary.terms() {
            let vector = terms
                .get(term)
                .ok_or_else(|| ProjectionError::Other(format!("no vector for term '{term}'")))?;
            let width = *expected.get_or_insert(vector.len());
            if vector.len() != width {
                return Err(ProjectionError::InvalidDimension {
                    expected: width,
                    actual: vector.len(),
                });
            }
            rows.push(vector);
        }
        match stats {
            Some(stats) => rows
                .into_par_iter()
                .map(|v| -> Result<Vec<f64>> { Ok(stats.standardize(v)?.to_vec()) })
                .collect(),
            None => Ok(rows.into_iter().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poles::PoleVector;
    use lexaxis_axes::{AxisBuilder, AxisQualityFilter};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const THESAURUS: &str = "strong.a.01\tstrong\tweak\nbig.a.01\tbig\tsmall\nhot.a.01\thot\tcold\n";

    fn quality(accepted: &[&str]) -> QualityReport {
        let mut report = AxisQualityFilter::evaluate(&[]);
        report.accepted = accepted.iter().map(|a| AxisId::new(*a)).collect();
        report
    }

    fn pv(axis: &str, side: Side, word: &str, vector: &[f64]) -> PoleVector {
        PoleVector {
            axis_id: AxisId::new(axis),
            side,
            word: word.to_string(),
            vector: vector.to_vec(),
        }
    }

    fn terms(entries: &[(&str, [f64; 2])]) -> TermVectors {
        entries
            .iter()
            .map(|(t, v)| (t.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn scores_follow_direction_and_drop_unusable_axes() {
        let thesaurus = AxisBuilder::parse_str(THESAURUS).unwrap();
        let poles = PoleSet::build(
            &[
                pv("strong.a.01", Side::Left, "strong", &[0.0, 0.0]),
                pv("strong.a.01", Side::Right, "weak", &[1.0, 0.0]),
                pv("big.a.01", Side::Left, "big", &[1.0, 1.0]),
                pv("big.a.01", Side::Right, "small", &[1.0, 1.0]),
                pv("hot.a.01", Side::Left, "hot", &[1.0, 1.0]),
            ],
            &thesaurus,
            None,
        )
        .unwrap();
        let quality = quality(&["strong.a.01", "big.a.01", "hot.a.01", "gone.a.01"]);
        let vectors = terms(&[
            ("man", [2.0, 0.0]),
            ("woman", [-3.0, 0.0]),
            ("null", [0.0, 0.0]),
        ]);
        let vocabulary = VocabularyOrder::from_terms(vectors.keys().cloned());

        let projection = AxisProjector::new(&thesaurus, &quality)
            .project(&poles, &vectors, None, vocabulary, false)
            .unwrap();

        assert_eq!(projection.vocabulary.terms(), ["man", "null", "woman"]);
        assert_eq!(projection.scores.len(), 1);
        let strong = &projection.scores[&AxisId::new("strong.a.01")];
        assert!((strong[0] - 0.0).abs() < 1e-12);
        assert!((strong[1] - 1.0).abs() < 1e-12);
        assert!((strong[2] - 2.0).abs() < 1e-12);

        let report = &projection.report;
        assert_eq!(report.not_in_thesaurus, vec![AxisId::new("gone.a.01")]);
        assert_eq!(report.empty_pole, vec![AxisId::new("hot.a.01")]);
        assert_eq!(report.zero_direction, vec![AxisId::new("big.a.01")]);
    }

    #[test]
    fn rejected_axes_are_not_projected() {
        let thesaurus = AxisBuilder::parse_str(THESAURUS).unwrap();
        let poles = PoleSet::build(
            &[
                pv("strong.a.01", Side::Left, "strong", &[0.0, 1.0]),
                pv("strong.a.01", Side::Right, "weak", &[1.0, 0.0]),
            ],
            &thesaurus,
            None,
        )
        .unwrap();
        let vectors = terms(&[("man", [1.0, 0.0])]);
        let vocabulary = VocabularyOrder::from_terms(vectors.keys().cloned());
        let projection = AxisProjector::new(&thesaurus, &quality(&[]))
            .project(&poles, &vectors, None, vocabulary, false)
            .unwrap();
        assert!(projection.scores.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_fatal_before_scoring() {
        let thesaurus = AxisBuilder::parse_str(THESAURUS).unwrap();
        let poles = PoleSet::build(
            &[
                pv("strong.a.01", Side::Left, "strong", &[0.0, 1.0]),
                pv("strong.a.01", Side::Right, "weak", &[1.0, 0.0]),
            ],
            &thesaurus,
            None,
        )
        .unwrap();
        let stats = StandardizationStats::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        let vectors = terms(&[("man", [1.0, 0.0])]);
        let vocabulary = VocabularyOrder::from_terms(vectors.keys().cloned());
        let err = AxisProjector::new(&thesaurus, &quality(&["strong.a.01"]))
            .project(&poles, &vectors, Some(&stats), vocabulary, false)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::VectorStoreError(_)));
    }

    #[test]
    fn vocabulary_must_match_terms() {
        let thesaurus = AxisBuilder::parse_str(THESAURUS).unwrap();
        let vectors = terms(&[("man", [1.0, 0.0]), ("boy", [0.0, 1.0])]);
        let vocabulary = VocabularyOrder::from_terms(["man"]);
        let err = AxisProjector::new(&thesaurus, &quality(&[]))
            .project(&PoleSet::default(), &vectors, None, vocabulary, true)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::VocabularyMismatch { .. }));
    }

    #[test]
    fn save_writes_both_outputs() {
        let tmp = TempDir::new().unwrap();
        let mut scores = AxisScores::new();
        scores.insert(AxisId::new("strong.a.01"), vec![0.5, 1.5]);
        let projection = Projection {
            vocabulary: VocabularyOrder::from_terms(["a", "b"]),
            scores,
            report: ProjectionReport::default(),
        };
        projection.save(tmp.path()).unwrap();
        let raw = std::fs::read_to_string(tmp.path().join(SCORES_FILE)).unwrap();
        let parsed: AxisScores = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, projection.scores);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join(VOCAB_ORDER_FILE)).unwrap(),
            "a\nb"
        );
    }

    #[test]
    fn failed_save_leaves_no_scores_behind() {
        let tmp = TempDir::new().unwrap();
        // A directory where the staged vocabulary file should go makes that write fail.
        std::fs::create_dir(tmp.path().join("vocab_order.txt.tmp")).unwrap();
        let mut scores = AxisScores::new();
        scores.insert(AxisId::new("strong.a.01"), vec![0.5]);
        let projection = Projection {
            vocabulary: VocabularyOrder::from_terms(["a"]),
            scores,
            report: ProjectionReport::default(),
        };
        assert!(projection.save(tmp.path()).is_err());
        assert!(!tmp.path().join(SCORES_FILE).exists());
        assert!(!tmp.path().join("scores.json.tmp").exists());
        assert!(!tmp.path().join(VOCAB_ORDER_FILE).exists());
    }
}
