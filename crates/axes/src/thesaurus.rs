use crate::error::{AxesError, Result};
use crate::types::{Axis, AxisId, PoleKey, Side};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Skip counts for one thesaurus parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesaurusReport {
    pub lines: usize,
    pub axes: usize,
    /// Fewer than two poles, an empty pole, or an empty id.
    pub malformed: usize,
    /// A word listed on both poles of one record.
    pub overlapping_poles: usize,
    /// Repeated records with identical poles.
    pub duplicates: usize,
}

/// Synonyms and antonyms of a word on one axis side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSenses {
    pub synonyms: BTreeSet<String>,
    pub antonyms: BTreeSet<String>,
}

/// `word -> {pole key -> senses}`
pub type WordLookup = BTreeMap<String, BTreeMap<PoleKey, WordSenses>>;

#[derive(Debug, Clone, Default)]
pub struct Thesaurus {
    axes: BTreeMap<AxisId, Axis>,
    report: ThesaurusReport,
}

impl Thesaurus {
    #[must_use]
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    #[must_use]
    pub fn axis(&self, id: &AxisId) -> Option<&Axis> {
        self.axes.get(id)
    }

    pub fn axes(&self) -> impl Iterator<Item = &Axis> {
        self.axes.values()
    }

    #[must_use]
    pub const fn report(&self) -> &ThesaurusReport {
        &self.report
    }

    /// All pole keys in sorted order.
    pub fn pole_keys(&self) -> impl Iterator<Item = PoleKey> + '_ {
        self.axes
            .keys()
            .flat_map(|id| Side::BOTH.into_iter().map(|side| PoleKey::new(id.clone(), side)))
    }

    /// Builds the per-word synonym/antonym lookup. A word's synonyms exclude the word itself.
    #[must_use]
    pub fn lookup(&self) -> WordLookup {
        let mut lookup = WordLookup::new();
        for axis in self.axes.values() {
            for side in Side::BOTH {
                let own = axis.pole(side);
                let other = axis.pole(side.opposite());
                for word in own {
                    let synonyms = own.iter().filter(|w| *w != word).cloned().collect();
                    lookup.entry(word.clone()).or_default().insert(
                        PoleKey::new(axis.id.clone(), side),
                        WordSenses {
                            synonyms,
                            antonyms: other.clone(),
                        },
                    );
                }
            }
        }
        lookup
    }
}

pub struct AxisBuilder;

impl AxisBuilder {
    pub fn load(path: impl AsRef<Path>) -> Result<Thesaurus> {
        let path = path.as_ref();
        log::info!("Loading thesaurus from {:?}", path);
        let raw = std::fs::read_to_string(path)?;
        Self::parse_str(&raw)
    }

    /// Parses `axis_id \t left_csv \t right_csv [\t label]` records.
    pub fn parse_str(raw: &str) -> Result<Thesaurus> {
        let mut axes: BTreeMap<AxisId, Axis> = BTreeMap::new();
        let mut first_seen: BTreeMap<AxisId, usize> = BTreeMap::new();
        let mut report = ThesaurusReport::default();

        for (idx, line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            report.lines += 1;

            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 3 {
                log::debug!("thesaurus line {line_no}: no antonym pole, skipping");
                report.malformed += 1;
                continue;
            }
            let id = fields[0].trim();
            let left = parse_pole(fields[1]);
            let right = parse_pole(fields[2]);
            if id.is_empty() || left.is_empty() || right.is_empty() {
                report.malformed += 1;
                continue;
            }
            if !left.is_disjoint(&right) {
                log::warn!("thesaurus line {line_no}: axis '{id}' lists a word on both poles, skipping");
                report.overlapping_poles += 1;
                continue;
            }
            let label = fields
                .get(3)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            let axis = Axis {
                id: AxisId::new(id),
                left,
                right,
                label,
            };

            if let Some(existing) = axes.get(&axis.id) {
                if existing.same_poles(&axis) {
                    report.duplicates += 1;
                    continue;
                }
                return Err(AxesError::ConflictingAxis {
                    axis: axis.id.to_string(),
                    first_line: first_seen.get(&axis.id).copied().unwrap_or_default(),
                    second_line: line_no,
                });
            }
            first_seen.insert(axis.id.clone(), line_no);
            axes.insert(axis.id.clone(), axis);
        }

        report.axes = axes.len();
        log::info!(
            "Built {} axes ({} malformed, {} overlapping, {} duplicate lines skipped)",
            report.axes,
            report.malformed,
            report.overlapping_poles,
            report.duplicates
        );
        Ok(Thesaurus { axes, report })
    }
}

fn parse_pole(field: &str) -> BTreeSet<String> {
    field
        .split(',')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn set(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn builds_lookup_with_self_excluded_from_synonyms() {
        let thesaurus =
            AxisBuilder::parse_str("strong.a.01\tstrong,powerful\tweak,feeble\tstrength\n").unwrap();
        assert_eq!(thesaurus.len(), 1);
        let axis = thesaurus.axis(&AxisId::new("strong.a.01")).unwrap();
        assert_eq!(axis.label.as_deref(), Some("strength"));

        let lookup = thesaurus.lookup();
        let strong = &lookup["strong"][&PoleKey::new("strong.a.01", Side::Left)];
        assert_eq!(strong.synonyms, set(&["powerful"]));
        assert_eq!(strong.antonyms, set(&["feeble", "weak"]));

        let weak = &lookup["weak"][&PoleKey::new("strong.a.01", Side::Right)];
        assert_eq!(weak.synonyms, set(&["feeble"]));
        assert_eq!(weak.antonyms, set(&["powerful", "strong"]));
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let raw = "only.a.01\tlonely\n\
                   # comment\n\
                   \n\
                   empty.a.01\t\tweak\n\
                   both.a.01\tgood,bad\tbad\n\
                   good.a.01\tgood\tbad\n";
        let thesaurus = AxisBuilder::parse_str(raw).unwrap();
        assert_eq!(thesaurus.len(), 1);
        let report = thesaurus.report();
        assert_eq!(report.lines, 4);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.overlapping_poles, 1);
    }

    #[test]
    fn duplicate_axis_is_ignored_but_conflict_fails() {
        let same = "a.a.01\tx,y\tz\na.a.01\ty,x\tz\n";
        let thesaurus = AxisBuilder::parse_str(same).unwrap();
        assert_eq!(thesaurus.report().duplicates, 1);

        let conflict = "a.a.01\tx,y\tz\na.a.01\tx\tz\n";
        let err = AxisBuilder::parse_str(conflict).unwrap_err();
        assert!(matches!(
            err,
            AxesError::ConflictingAxis {
                first_line: 1,
                second_line: 2,
                ..
            }
        ));
    }

    #[test]
    fn word_may_appear_in_several_axes() {
        let raw = "strong.a.01\tstrong\tweak\nstrong.a.02\tstrong,intense\tmild\n";
        let lookup = AxisBuilder::parse_str(raw).unwrap().lookup();
        assert_eq!(lookup["strong"].len(), 2);
    }

    proptest! {
        #[test]
        fn poles_and_senses_stay_disjoint(
            left in proptest::collection::btree_set("[a-e]{1,3}", 1..6),
            right in proptest::collection::btree_set("[a-e]{1,3}", 1..6),
        ) {
            let line = format!(
                "p.a.01\t{}\t{}",
                left.iter().cloned().collect::<Vec<_>>().join(","),
                right.iter().cloned().collect::<Vec<_>>().join(","),
            );
            let thesaurus = AxisBuilder::parse_str(&line).unwrap();
            for axis in thesaurus.axes() {
                prop_assert!(axis.left.is_disjoint(&axis.right));
            }
            for (word, senses) in thesaurus.lookup() {
                for s in senses.values() {
                    prop_assert!(s.synonyms.is_disjoint(&s.antonyms));
                    prop_assert!(!s.synonyms.contains(&word));
                }
            }
        }
    }
}
