//! Count-weighted re-aggregation of per-partition embeddings.
//!
//! Sums are kept in fixed point so that merging partial accumulators is exactly associative
//! and commutative: the result never depends on how partitions were grouped or in which
//! order they were merged.

use crate::error::{Result, VectorStoreError};
use crate::store::{
    discover_partitions, resolve_dimension, PartitionSource, RawPartition, RawRecord,
    RecordSkips, TermVectors, YearlyTermVectors,
};
use crate::types::{AggregationMode, GroupKey};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Fixed-point scale, `2^40`.
const SCALE: f64 = (1u64 << 40) as f64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GroupSum {
    weighted: Vec<i128>,
    count: u64,
}

/// Per-group running `Σ count·vector` and `Σ count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermAccumulator {
    dimension: Option<usize>,
    groups: BTreeMap<GroupKey, GroupSum>,
}

impl TermAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            groups: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn add(&mut self, key: GroupKey, vector: &[f64], count: u64) -> Result<()> {
        let dimension = *self.dimension.get_or_insert(vector.len());
        if vector.len() != dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: dimension,
                actual: vector.len(),
            });
        }
        let overflow = || VectorStoreError::Overflow(key.term.clone());
        let weight = i128::from(count);
        let mut scaled = Vec::with_capacity(dimension);
        for value in vector {
            let fixed = (value * SCALE).round() as i128;
            scaled.push(fixed.checked_mul(weight).ok_or_else(overflow)?);
        }

        let sum = self.groups.entry(key.clone()).or_insert_with(|| GroupSum {
            weighted: vec![0; dimension],
            count: 0,
        });
        for (acc, value) in sum.weighted.iter_mut().zip(scaled) {
            *acc = acc.checked_add(value).ok_or_else(overflow)?;
        }
        sum.count = sum.count.checked_add(count).ok_or_else(overflow)?;
        Ok(())
    }

    pub fn merge(mut self, other: Self) -> Result<Self> {
        let dimension = match (self.dimension, other.dimension) {
            (Some(a), Some(b)) if a != b => {
                return Err(VectorStoreError::InvalidDimension {
                    expected: a,
                    actual: b,
                })
            }
            (a, b) => a.or(b),
        };
        self.dimension = dimension;
        for (key, theirs) in other.groups {
            match self.groups.get_mut(&key) {
                None => {
                    self.groups.insert(key, theirs);
                }
                Some(ours) => {
                    let overflow = || VectorStoreError::Overflow(key.term.clone());
                    for (acc, value) in ours.weighted.iter_mut().zip(theirs.weighted) {
                        *acc = acc.checked_add(value).ok_or_else(overflow)?;
                    }
                    ours.count = ours.count.checked_add(theirs.count).ok_or_else(overflow)?;
                }
            }
        }
        Ok(self)
    }

    /// Divides every group sum by its count, once. Groups with a zero total count are left
    /// out and logged.
    #[must_use]
    pub fn finalize(self) -> (BTreeMap<GroupKey, Vec<f64>>, usize) {
        let mut out = BTreeMap::new();
        let mut zero_count = 0;
        for (key, sum) in self.groups {
            if sum.count == 0 {
                log::warn!(
                    "Term '{}' (year {:?}) has a total count of 0; excluded",
                    key.term,
                    key.year
                );
                zero_count += 1;
                continue;
            }
            let denom = SCALE * sum.count as f64;
            let mean = sum.weighted.iter().map(|&v| v as f64 / denom).collect();
            out.insert(key, mean);
        }
        (out, zero_count)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub partitions: usize,
    pub records: usize,
    #[serde(flatten)]
    pub skips: RecordSkips,
    pub missing_year: usize,
    pub zero_count_groups: usize,
    pub groups: usize,
}

impl AggregationReport {
    fn absorb(&mut self, other: Self) {
        self.partitions += other.partitions;
        self.records += other.records;
        self.skips.absorb(other.skips);
        self.missing_year += other.missing_year;
        self.zero_count_groups += other.zero_count_groups;
        self.groups += other.groups;
    }
}

/// Aggregated vectors, keyed per term (and per year in yearly mode).
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub mode: AggregationMode,
    pub vectors: BTreeMap<GroupKey, Vec<f64>>,
    pub report: AggregationReport,
}

impl Aggregation {
    /// `{term: vector}` for overall aggregations.
    #[must_use]
    pub fn overall(&self) -> TermVectors {
        self.vectors
            .iter()
            .map(|(key, v)| (key.term.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn yearly(&self) -> YearlyTermVectors {
        let mut out = YearlyTermVectors::new();
        for (key, v) in &self.vectors {
            if let Some(year) = key.year {
                out.entry(key.term.clone()).or_default().insert(year, v.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingAggregator {
    mode: AggregationMode,
    dimension: Option<usize>,
}

impl EmbeddingAggregator {
    #[must_use]
    pub fn new(mode: AggregationMode) -> Self {
        Self {
            mode,
            dimension: None,
        }
    }

    /// Fixes the expected vector width instead of taking the most common raw width.
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Accumulates one partition.
    pub fn accumulate(
        &self,
        partition: &RawPartition,
    ) -> Result<(TermAccumulator, AggregationReport)> {
        let (records, skips) = partition.records(self.dimension);
        let mut acc = match self.dimension {
            Some(d) => TermAccumulator::with_dimension(d),
            None => TermAccumulator::new(),
        };
        let mut report = AggregationReport {
            partitions: 1,
            skips,
            ..AggregationReport::default()
        };
        for record in records {
            let Some(group) = self.group_key(partition, &record) else {
                report.missing_year += 1;
                continue;
            };
            acc.add(group, record.vector, record.count)?;
            report.records += 1;
        }
        if report.missing_year > 0 {
            log::warn!(
                "Partition {}: {} records without a year skipped",
                partition.key,
                report.missing_year
            );
        }
        Ok((acc, report))
    }

    fn group_key(&self, partition: &RawPartition, record: &RawRecord<'_>) -> Option<GroupKey> {
        match self.mode {
            AggregationMode::Overall => Some(GroupKey::overall(record.key.term.as_str())),
            AggregationMode::Yearly => record
                .key
                .year
                .or(partition.key.year)
                .map(|year| GroupKey::yearly(record.key.term.as_str(), year)),
        }
    }

    /// Loads and accumulates partitions in parallel, then merges and finalizes.
    ///
    /// Without a fixed dimension the most common width over all partitions is used, so
    /// every partition skips the same odd records.
    pub fn aggregate(&self, sources: &[PartitionSource]) -> Result<Aggregation> {
        let aggregator = match self.dimension {
            Some(_) => *self,
            None => Self {
                dimension: resolve_dimension(sources)?,
                ..*self
            },
        };
        let (acc, mut report) = sources
            .par_iter()
            .map(|source| {
                let partition = RawPartition::load(source)?;
                log::debug!("Accumulating partition {}", partition.key);
                aggregator.accumulate(&partition)
            })
            .try_reduce(
                || (TermAccumulator::new(), AggregationReport::default()),
                |(a, mut ra), (b, rb)| {
                    ra.absorb(rb);
                    Ok((a.merge(b)?, ra))
                },
            )?;
        let (vectors, zero_count) = acc.finalize();
        report.zero_count_groups = zero_count;
        report.groups = vectors.len();
        log::info!(
            "Aggregated {} records from {} partitions into {} groups",
            report.records,
            report.partitions,
            report.groups
        );
        Ok(Aggregation {
            mode: self.mode,
            vectors,
            report,
        })
    }

    pub fn aggregate_dir(&self, dir: impl AsRef<Path>) -> Result<Aggregation> {
        let sources = discover_partitions(dir)?;
        self.aggregate(&sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartitionKey;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn partition(stem: &str, records: &[(&str, Vec<f64>, u64)]) -> RawPartition {
        let vectors = records
            .iter()
            .map(|(k, v, _)| (k.to_string(), v.clone()))
            .collect();
        let counts = records.iter().map(|(k, _, c)| (k.to_string(), *c)).collect();
        RawPartition::from_maps(PartitionKey::from_stem(stem), vectors, &counts)
    }

    #[test]
    fn weighted_mean_of_two_records() {
        let mut acc = TermAccumulator::new();
        acc.add(GroupKey::overall("man"), &[0.1, -2.0], 2).unwrap();
        acc.add(GroupKey::overall("man"), &[0.7, 3.5], 3).unwrap();
        let (out, zero) = acc.finalize();
        assert_eq!(zero, 0);
        let v = &out[&GroupKey::overall("man")];
        assert!((v[0] - (2.0 * 0.1 + 3.0 * 0.7) / 5.0).abs() < 1e-9);
        assert!((v[1] - (2.0 * -2.0 + 3.0 * 3.5) / 5.0).abs() < 1e-9);
    }

    #[test]
    fn zero_count_group_is_excluded() {
        let mut acc = TermAccumulator::new();
        acc.add(GroupKey::overall("ghost"), &[1.0], 0).unwrap();
        acc.add(GroupKey::overall("man"), &[1.0], 1).unwrap();
        let (out, zero) = acc.finalize();
        assert_eq!(zero, 1);
        assert_eq!(out.len(), 1);
        assert!(out.values().all(|v| v.iter().all(|x| x.is_finite())));
    }

    #[test]
    fn merge_rejects_mismatched_dimensions() {
        let mut a = TermAccumulator::new();
        a.add(GroupKey::overall("a"), &[1.0, 2.0], 1).unwrap();
        let mut b = TermAccumulator::new();
        b.add(GroupKey::overall("b"), &[1.0], 1).unwrap();
        assert!(matches!(
            a.merge(b),
            Err(VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn yearly_mode_prefers_key_year_over_partition_year() {
        let aggregator = EmbeddingAggregator::new(AggregationMode::Yearly);
        let forum = partition(
            "forum_mgtow",
            &[
                ("man_noun_2012", vec![1.0, 1.0], 1),
                ("man_noun_None", vec![5.0, 5.0], 1),
            ],
        );
        let (acc, report) = aggregator.accumulate(&forum).unwrap();
        assert_eq!(report.missing_year, 1);
        assert_eq!(report.records, 1);

        let reddit = partition("reddit_2012", &[("man_noun_None", vec![3.0, 3.0], 1)]);
        let (acc2, _) = aggregator.accumulate(&reddit).unwrap();
        let (out, _) = acc.merge(acc2).unwrap().finalize();
        let v = &out[&GroupKey::yearly("man", 2012)];
        assert!((v[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_reads_partitions_from_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("reddit_2010.json"),
            r#"{"man_noun_2010": [1.0, 0.0], "woman_noun_2010": [0.0, 2.0]}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("reddit_2010_wordcounts.json"),
            r#"{"man_noun_2010": 1, "woman_noun_2010": 4}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("forum_avfm.json"),
            r#"{"man_noun_None": [3.0, 0.0], "bad": [1.0, 1.0]}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("forum_avfm_wordcounts.json"),
            r#"{"man_noun_None": 1}"#,
        )
        .unwrap();

        let agg = EmbeddingAggregator::new(AggregationMode::Overall)
            .aggregate_dir(tmp.path())
            .unwrap();
        assert_eq!(agg.report.partitions, 2);
        assert_eq!(agg.report.records, 3);
        assert_eq!(agg.report.skips.unparsable_keys, 1);
        let overall = agg.overall();
        assert_eq!(overall.keys().collect::<Vec<_>>(), vec!["man", "woman"]);
        assert!((overall["man"][0] - 2.0).abs() < 1e-9);
        assert!((overall["woman"][1] - 2.0).abs() < 1e-9);
    }

    fn write_partition(dir: &std::path::Path, stem: &str, vectors: &str, counts: &str) {
        std::fs::write(dir.join(format!("{stem}.json")), vectors).unwrap();
        std::fs::write(dir.join(format!("{stem}_wordcounts.json")), counts).unwrap();
    }

    #[test]
    fn mixed_widths_inside_a_partition_skip_only_the_odd_record() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_partition(
            tmp.path(),
            "reddit_2010",
            r#"{"aaa_noun_2010": [9.0], "man_noun_2010": [1.0, 2.0], "woman_noun_2010": [3.0, 4.0]}"#,
            r#"{"aaa_noun_2010": 1, "man_noun_2010": 1, "woman_noun_2010": 1}"#,
        );
        let agg = EmbeddingAggregator::new(AggregationMode::Overall)
            .aggregate_dir(tmp.path())
            .unwrap();
        assert_eq!(agg.report.records, 2);
        assert_eq!(agg.report.skips.wrong_width, 1);
        let overall = agg.overall();
        assert_eq!(overall.keys().collect::<Vec<_>>(), vec!["man", "woman"]);
        assert_eq!(overall["man"], vec![1.0, 2.0]);
    }

    #[test]
    fn partitions_with_disagreeing_widths_share_one_dimension() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_partition(
            tmp.path(),
            "forum_avfm",
            r#"{"aaa_noun_None": [1.0, 2.0, 3.0]}"#,
            r#"{"aaa_noun_None": 1}"#,
        );
        write_partition(
            tmp.path(),
            "reddit_2010",
            r#"{"man_noun_2010": [1.0, 2.0], "woman_noun_2010": [3.0, 4.0]}"#,
            r#"{"man_noun_2010": 1, "woman_noun_2010": 1}"#,
        );
        let agg = EmbeddingAggregator::new(AggregationMode::Overall)
            .aggregate_dir(tmp.path())
            .unwrap();
        assert_eq!(agg.report.partitions, 2);
        assert_eq!(agg.report.records, 2);
        assert_eq!(agg.report.skips.wrong_width, 1);
        assert_eq!(agg.vectors.len(), 2);

        let fixed = EmbeddingAggregator::new(AggregationMode::Overall)
            .with_dimension(3)
            .aggregate_dir(tmp.path())
            .unwrap();
        assert_eq!(fixed.report.records, 1);
        assert_eq!(fixed.report.skips.wrong_width, 2);
        assert_eq!(fixed.overall()["aaa"], vec![1.0, 2.0, 3.0]);
    }

    fn arb_records() -> impl Strategy<Value = Vec<(usize, Vec<f64>, u64)>> {
        prop::collection::vec(
            (
                0usize..4,
                prop::collection::vec(-100.0f64..100.0, 3),
                0u64..1000,
            ),
            1..40,
        )
    }

    fn accumulate(records: &[(usize, Vec<f64>, u64)]) -> TermAccumulator {
        let mut acc = TermAccumulator::with_dimension(3);
        for (term, v, c) in records {
            acc.add(GroupKey::overall(format!("t{term}")), v, *c).unwrap();
        }
        acc
    }

    proptest! {
        #[test]
        fn merge_order_does_not_change_result(
            records in arb_records(),
            cut_a in 0usize..40,
            cut_b in 0usize..40,
        ) {
            let n = records.len();
            let (lo, hi) = if cut_a <= cut_b { (cut_a, cut_b) } else { (cut_b, cut_a) };
            let (lo, hi) = (lo.min(n), hi.min(n));

            let single = accumulate(&records);
            let left_to_right = accumulate(&records[..lo])
                .merge(accumulate(&records[lo..hi]))
                .unwrap()
                .merge(accumulate(&records[hi..]))
                .unwrap();
            let right_to_left = accumulate(&records[hi..])
                .merge(accumulate(&records[lo..hi]).merge(accumulate(&records[..lo])).unwrap())
                .unwrap();

            prop_assert_eq!(&single, &left_to_right);
            prop_assert_eq!(&single, &right_to_left);
            prop_assert_eq!(single.finalize(), right_to_left.finalize());
        }
    }
}
