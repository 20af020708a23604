use crate::error::Result;
use crate::types::{AxisId, Side};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A held-out probe word with the score a model assigned it and the pole it truly belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeScore {
    pub axis: AxisId,
    pub word: String,
    pub predicted: f64,
    pub true_side: Side,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeLoad {
    pub scores: Vec<ProbeScore>,
    pub malformed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideScores {
    pub left: f64,
    pub right: f64,
    pub left_probes: usize,
    pub right_probes: usize,
}

impl SideScores {
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.left >= 0.0 && self.right >= 0.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub sides: BTreeMap<AxisId, SideScores>,
    pub accepted: BTreeSet<AxisId>,
    pub rejected: BTreeSet<AxisId>,
    #[serde(default)]
    pub malformed_probes: usize,
}

impl QualityReport {
    #[must_use]
    pub fn is_accepted(&self, axis: &AxisId) -> bool {
        self.accepted.contains(axis)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
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
}

pub struct AxisQualityFilter;

impl AxisQualityFilter {
    pub fn load_probes(path: impl AsRef<Path>) -> Result<ProbeLoad> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::parse_probes(&raw))
    }

    /// Parses `axis_id \t word \t predicted \t left|right` records.
    #[must_use]
    pub fn parse_probes(raw: &str) -> ProbeLoad {
        let mut load = ProbeLoad::default();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.trim().split('\t').collect();
            let parsed = match fields.as_slice() {
                [axis, word, predicted, side, ..] => predicted
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|p| p.is_finite())
                    .zip(Side::parse(side))
                    .filter(|_| !axis.trim().is_empty())
                    .map(|(predicted, true_side)| ProbeScore {
                        axis: AxisId::new(axis.trim()),
                        word: word.trim().to_string(),
                        predicted,
                        true_side,
                    }),
                _ => None,
            };
            match parsed {
                Some(score) => load.scores.push(score),
                None => load.malformed += 1,
            }
        }
        if load.malformed > 0 {
            log::warn!("Skipped {} malformed probe lines", load.malformed);
        }
        load
    }

    /// Left probes count with their sign flipped, so a positive side score means the model
    /// placed that side's probes on the correct side. A side without probes scores 0.
    #[must_use]
    pub fn side_scores(probes: &[ProbeScore]) -> BTreeMap<AxisId, SideScores> {
        let mut sums: BTreeMap<&AxisId, [(f64, usize); 2]> = BTreeMap::new();
        for probe in probes {
            let entry = sums.entry(&probe.axis).or_default();
            match probe.true_side {
                Side::Left => {
                    entry[0].0 -= probe.predicted;
                    entry[0].1 += 1;
                }
                Side::Right => {
                    entry[1].0 += probe.predicted;
                    entry[1].1 += 1;
                }
            }
        }
        sums.into_iter()
            .map(|(axis, [(l, ln), (r, rn)])| {
                let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };
                (
                    axis.clone(),
                    SideScores {
                        left: mean(l, ln),
                        right: mean(r, rn),
                        left_probes: ln,
                        right_probes: rn,
                    },
                )
            })
            .collect()
    }

    /// Accepts an axis only when both side scores are non-negative.
    #[must_use]
    pub fn evaluate(probes: &[ProbeScore]) -> QualityReport {
        let sides = Self::side_scores(probes);
        let mut report = QualityReport::default();
        for (axis, scores) in &sides {
            if scores.accepted() {
                report.accepted.insert(axis.clone());
            } else {
                log::debug!(
                    "axis {axis} rejected (left {:.4}, right {:.4})",
                    scores.left,
                    scores.right
                );
                report.rejected.insert(axis.clone());
            }
        }
        log::info!(
            "Axis quality: {} accepted, {} rejected",
            report.accepted.len(),
            report.rejected.len()
        );
        report.sides = sides;
        report
    }
}
