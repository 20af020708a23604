use crate::error::{Result, VectorStoreError};
use crate::store::{
    discover_partitions, resolve_dimension, save_json, PartitionSource, RawPartition,
    RecordSkips, TermVectors, YearlyTermVectors,
};
use ndarray::{Array1, ArrayView1, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Count-weighted running mean and sum of squared deviations (Chan et al. merge).
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    weight: f64,
    mean: Option<Array1<f64>>,
    m2: Option<Array1<f64>>,
    records: usize,
}

impl StatsAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn add(&mut self, vector: &[f64], count: u64) -> Result<()> {
        let single = Self {
            weight: count as f64,
            mean: Some(Array1::from(vector.to_vec())),
            m2: Some(Array1::zeros(vector.len())),
            records: 1,
        };
        let merged = std::mem::take(self).merge(single)?;
        *self = merged;
        Ok(())
    }

    pub fn merge(self, other: Self) -> Result<Self> {
        let records = self.records + other.records;
        let (Some(mean_a), Some(m2_a)) = (self.mean.clone(), self.m2.clone()) else {
            return Ok(Self { records, ..other });
        };
        let (Some(mean_b), Some(m2_b)) = (other.mean, other.m2) else {
            return Ok(Self { records, ..self });
        };
        if mean_a.len() != mean_b.len() {
            return Err(VectorStoreError::InvalidDimension {
                expected: mean_a.len(),
                actual: mean_b.len(),
            });
        }
        let weight = self.weight + other.weight;
        if weight == 0.0 {
            return Ok(Self {
                weight,
                mean: Some(mean_a),
                m2: Some(m2_a),
                records,
            });
        }
        let delta = &mean_b - &mean_a;
        let mean = &mean_a + &(&delta * (other.weight / weight));
        let m2 = &m2_a + &m2_b + &(&delta * &delta * (self.weight * other.weight / weight));
        Ok(Self {
            weight,
            mean: Some(mean),
            m2: Some(m2),
            records,
        })
    }

    /// Population statistics over everything added so far.
    pub fn finish(self) -> Result<StandardizationStats> {
        let (Some(mean), Some(m2)) = (self.mean, self.m2) else {
            return Err(VectorStoreError::InvalidStats(
                "no records to compute statistics from".to_string(),
            ));
        };
        if self.weight == 0.0 {
            return Err(VectorStoreError::InvalidStats(
                "total record count is 0".to_string(),
            ));
        }
        let std = m2.mapv(|v| (v.max(0.0) / self.weight).sqrt());
        StandardizationStats::new(mean.to_vec(), std.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub partitions: usize,
    pub records: usize,
    #[serde(flatten)]
    pub skips: RecordSkips,
    pub dimension: usize,
}

/// Per-dimension mean and population standard deviation used to standardize vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizationStats {
    pub dimension: usize,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl StandardizationStats {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Result<Self> {
        let stats = Self {
            dimension: mean.len(),
            mean,
            std,
        };
        stats.validate()?;
        Ok(stats)
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(VectorStoreError::InvalidStats("dimension is 0".to_string()));
        }
        for (name, values) in [("mean", &self.mean), ("std", &self.std)] {
            if values.len() != self.dimension {
                return Err(VectorStoreError::InvalidStats(format!(
                    "{name} has {} entries, dimension is {}",
                    values.len(),
                    self.dimension
                )));
            }
        }
        if let Some(i) = self.mean.iter().position(|v| !v.is_finite()) {
            return Err(VectorStoreError::InvalidStats(format!(
                "non-finite mean at index {i}"
            )));
        }
        if let Some(i) = self.std.iter().position(|v| !v.is_finite() || *v <= 0.0) {
            return Err(VectorStoreError::InvalidStats(format!(
                "std at index {i} is {} (must be finite and positive)",
                self.std[i]
            )));
        }
        Ok(())
    }

    /// Count-weighted statistics over raw partitions, accumulated in parallel.
    pub fn from_partitions(
        sources: &[PartitionSource],
        dimension: Option<usize>,
    ) -> Result<(Self, StatsReport)> {
        let dimension = match dimension {
            Some(d) => Some(d),
            None => resolve_dimension(sources)?,
        };
        let (acc, mut report) = sources
            .par_iter()
            .map(|source| {
                let partition = RawPartition::load(source)?;
                let (records, skips) = partition.records(dimension);
                let mut acc = StatsAccumulator::new();
                for record in &records {
                    acc.add(record.vector, record.count)?;
                }
                let report = StatsReport {
                    partitions: 1,
                    records: records.len(),
                    skips,
                    dimension: 0,
                };
                Ok::<_, VectorStoreError>((acc, report))
            })
            .try_reduce(
                || (StatsAccumulator::new(), StatsReport::default()),
                |(a, mut ra), (b, rb)| {
                    ra.partitions += rb.partitions;
                    ra.records += rb.records;
                    ra.skips.absorb(rb.skips);
                    Ok((a.merge(b)?, ra))
                },
            )?;
        let stats = acc.finish()?;
        report.dimension = stats.dimension;
        log::info!(
            "Computed statistics over {} records ({} dimensions)",
            report.records,
            report.dimension
        );
        Ok((stats, report))
    }

    pub fn from_dir(
        dir: impl AsRef<Path>,
        dimension: Option<usize>,
    ) -> Result<(Self, StatsReport)> {
        let sources = discover_partitions(dir)?;
        Self::from_partitions(&sources, dimension)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let stats: Self = serde_json::from_slice(&bytes)?;
        stats.validate()?;
        Ok(stats)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(path, self)
    }

    pub fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual,
            })
        }
    }

    /// `(vector - mean) / std`, elementwise.
    pub fn standardize(&self, vector: &[f64]) -> Result<Array1<f64>> {
        self.check_dimension(vector.len())?;
        let mean = ArrayView1::from(&self.mean);
        let std = ArrayView1::from(&self.std);
        let mut out = Array1::from(vector.to_vec());
        Zip::from(&mut out)
            .and(&mean)
            .and(&std)
            .for_each(|v, &m, &s| *v = (*v - m) / s);
        Ok(out)
    }

    /// Standardizes a whole table. Every width is checked before anything is computed.
    pub fn standardize_table(&self, table: &TermVectors) -> Result<TermVectors> {
        for vector in table.values() {
            self.check_dimension(vector.len())?;
        }
        table
            .iter()
            .map(|(term, v)| Ok((term.clone(), self.standardize(v)?.to_vec())))
            .collect()
    }

    pub fn standardize_yearly(&self, table: &YearlyTermVectors) -> Result<YearlyTermVectors> {
        for vector in table.values().flat_map(|years| years.values()) {
            self.check_dimension(vector.len())?;
        }
        let mut out = YearlyTermVectors::new();
        for (term, years) in table {
            let entry = out.entry(term.clone()).or_default();
            for (year, v) in years {
                entry.insert(*year, self.standardize(v)?.to_vec());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn weighted_population_statistics() {
        let mut acc = StatsAccumulator::new();
        acc.add(&[1.0, 10.0], 1).unwrap();
        acc.add(&[3.0, 10.0], 3).unwrap();
        acc.add(&[9.0, 0.0], 0).unwrap();
        let err = acc.clone().finish().unwrap_err();
        // Second dimension is constant over counted records.
        assert!(matches!(err, VectorStoreError::InvalidStats(_)));

        let mut acc = StatsAccumulator::new();
        acc.add(&[1.0, 0.0], 1).unwrap();
        acc.add(&[3.0, 4.0], 3).unwrap();
        let stats = acc.finish().unwrap();
        assert_eq!(stats.dimension, 2);
        assert!((stats.mean[0] - 2.5).abs() < 1e-12);
        assert!((stats.mean[1] - 3.0).abs() < 1e-12);
        // E[x^2] - mean^2 = (1 + 27) / 4 - 6.25 = 0.75
        assert!((stats.std[0] - 0.75f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn merge_matches_sequential() {
        let rows = [([1.0, 2.0], 2), ([4.0, -1.0], 1), ([0.5, 0.5], 5), ([2.0, 9.0], 3)];
        let mut seq = StatsAccumulator::new();
        for (v, c) in &rows {
            seq.add(v, *c).unwrap();
        }
        let mut a = StatsAccumulator::new();
        let mut b = StatsAccumulator::new();
        for (v, c) in &rows[..1] {
            a.add(v, *c).unwrap();
        }
        for (v, c) in &rows[1..] {
            b.add(v, *c).unwrap();
        }
        let merged = b.merge(a).unwrap().finish().unwrap();
        let seq = seq.finish().unwrap();
        for i in 0..2 {
            assert!((merged.mean[i] - seq.mean[i]).abs() < 1e-9);
            assert!((merged.std[i] - seq.std[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_zero_or_non_finite_std() {
        assert!(StandardizationStats::new(vec![0.0, 0.0], vec![1.0, 0.0]).is_err());
        assert!(StandardizationStats::new(vec![0.0], vec![f64::NAN]).is_err());
        assert!(StandardizationStats::new(vec![0.0, 1.0], vec![1.0]).is_err());

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stats.json");
        std::fs::write(&path, r#"{"dimension": 1, "mean": [0.0], "std": [0.0]}"#).unwrap();
        assert!(StandardizationStats::load(&path).is_err());
    }

    #[test]
    fn standardize_and_dimension_check() {
        let stats = StandardizationStats::new(vec![1.0, 2.0], vec![2.0, 0.5]).unwrap();
        let out = stats.standardize(&[3.0, 1.0]).unwrap();
        assert_eq!(out.to_vec(), vec![1.0, -2.0]);
        assert!(matches!(
            stats.standardize(&[1.0]),
            Err(VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 1
            })
        ));

        let mut table = TermVectors::new();
        table.insert("a".to_string(), vec![1.0, 2.0]);
        table.insert("b".to_string(), vec![1.0, 2.0, 3.0]);
        assert!(stats.standardize_table(&table).is_err());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stats.json");
        let stats = StandardizationStats::new(vec![0.5, -1.0], vec![1.0, 2.0]).unwrap();
        stats.save(&path).unwrap();
        assert_eq!(StandardizationStats::load(&path).unwrap(), stats);
    }

    #[test]
    fn statistics_from_partition_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("reddit_2011.json"),
            r#"{"a_n_2011": [0.0, 1.0], "b_n_2011": [2.0, 3.0]}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("reddit_2011_wordcounts.json"),
            r#"{"a_n_2011": 1, "b_n_2011": 1}"#,
        )
        .unwrap();
        let (stats, report) = StandardizationStats::from_dir(tmp.path(), None).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.dimension, 2);
        assert_eq!(stats.mean, vec![1.0, 2.0]);
        assert_eq!(stats.std, vec![1.0, 1.0]);
    }

    fn write_partition(dir: &Path, stem: &str, vectors: &str, counts: &str) {
        std::fs::write(dir.join(format!("{stem}.json")), vectors).unwrap();
        std::fs::write(dir.join(format!("{stem}_wordcounts.json")), counts).unwrap();
    }

    #[test]
    fn odd_width_record_is_skipped_not_adopted() {
        let tmp = TempDir::new().unwrap();
        write_partition(
            tmp.path(),
            "reddit_2011",
            r#"{"aaa_n_2011": [7.0], "a_n_2011": [0.0, 1.0], "b_n_2011": [2.0, 3.0]}"#,
            r#"{"aaa_n_2011": 5, "a_n_2011": 1, "b_n_2011": 1}"#,
        );
        let (stats, report) = StandardizationStats::from_dir(tmp.path(), None).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.skips.wrong_width, 1);
        assert_eq!(stats.mean, vec![1.0, 2.0]);
    }

    #[test]
    fn partitions_with_disagreeing_widths_do_not_abort() {
        let tmp = TempDir::new().unwrap();
        write_partition(
            tmp.path(),
            "forum_avfm",
            r#"{"x_n_None": [1.0, 2.0, 3.0]}"#,
            r#"{"x_n_None": 1}"#,
        );
        write_partition(
            tmp.path(),
            "reddit_2011",
            r#"{"a_n_2011": [0.0, 1.0], "b_n_2011": [2.0, 3.0]}"#,
            r#"{"a_n_2011": 1, "b_n_2011": 1}"#,
        );
        let (stats, report) = StandardizationStats::from_dir(tmp.path(), None).unwrap();
        assert_eq!(report.partitions, 2);
        assert_eq!(report.records, 2);
        assert_eq!(report.skips.wrong_width, 1);
        assert_eq!(report.dimension, 2);
        assert_eq!(stats.std, vec![1.0, 1.0]);
    }
}
