use crate::error::{Result, VectorStoreError};
use crate::types::{EmbeddingKey, PartitionKey};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const COUNTS_SUFFIX: &str = "_wordcounts";

/// Largest absolute component accepted from a raw store.
pub const MAX_ABS_VALUE: f64 = 1.0e6;

/// `{term: vector}`
pub type TermVectors = BTreeMap<String, Vec<f64>>;

/// `{term: {year: vector}}`
pub type YearlyTermVectors = BTreeMap<String, BTreeMap<i32, Vec<f64>>>;

/// On-disk location of one raw partition and its word-count sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSource {
    pub key: PartitionKey,
    pub vectors_path: PathBuf,
    pub counts_path: PathBuf,
}

/// Finds every `<stem>.json` partition in `dir` together with `<stem>_wordcounts.json`.
///
/// Sorted by path. A partition without its counts file is an error.
pub fn discover_partitions(dir: impl AsRef<Path>) -> Result<Vec<PartitionSource>> {
    let dir = dir.as_ref();
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.ends_with(COUNTS_SUFFIX) {
            continue;
        }
        let counts_path = dir.join(format!("{stem}{COUNTS_SUFFIX}.json"));
        if !counts_path.is_file() {
            return Err(VectorStoreError::MissingCounts {
                partition: stem.to_string(),
                path: counts_path,
            });
        }
        sources.push(PartitionSource {
            key: PartitionKey::from_stem(stem),
            vectors_path: path.clone(),
            counts_path,
        });
    }
    sources.sort_by(|a, b| a.vectors_path.cmp(&b.vectors_path));
    log::debug!("Found {} partitions in {:?}", sources.len(), dir);
    Ok(sources)
}

/// Why a raw record was not used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSkips {
    pub unparsable_keys: usize,
    pub missing_counts: usize,
    pub non_finite: usize,
    /// Finite components beyond `MAX_ABS_VALUE`.
    pub out_of_range: usize,
    pub wrong_width: usize,
}

impl RecordSkips {
    pub(crate) fn absorb(&mut self, other: Self) {
        self.unparsable_keys += other.unparsable_keys;
        self.missing_counts += other.missing_counts;
        self.non_finite += other.non_finite;
        self.out_of_range += other.out_of_range;
        self.wrong_width += other.wrong_width;
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.unparsable_keys
            + self.missing_counts
            + self.non_finite
            + self.out_of_range
            + self.wrong_width
    }
}

/// A validated raw record.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub key: &'a EmbeddingKey,
    pub vector: &'a [f64],
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct RawPartition {
    pub key: PartitionKey,
    /// Records whose key parsed; unparsable keys are dropped at load time.
    entries: Vec<(EmbeddingKey, Vec<f64>, Option<u64>)>,
    unparsable_keys: usize,
}

impl RawPartition {
    pub fn load(source: &PartitionSource) -> Result<Self> {
        let vectors: BTreeMap<String, Vec<f64>> = read_json(&source.vectors_path)?;
        let counts: BTreeMap<String, u64> = read_json(&source.counts_path)?;
        Ok(Self::from_maps(source.key.clone(), vectors, &counts))
    }

    #[must_use]
    pub fn from_maps(
        key: PartitionKey,
        vectors: BTreeMap<String, Vec<f64>>,
        counts: &BTreeMap<String, u64>,
    ) -> Self {
        let mut entries = Vec::with_capacity(vectors.len());
        let mut unparsable_keys = 0;
        for (raw_key, vector) in vectors {
            match EmbeddingKey::parse(&raw_key) {
                Some(parsed) => {
                    let count = counts.get(&raw_key).copied();
                    entries.push((parsed, vector, count));
                }
                None => unparsable_keys += 1,
            }
        }
        Self {
            key,
            entries,
            unparsable_keys,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + self.unparsable_keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widths of the records that pass every other check, with their frequencies.
    #[must_use]
    pub fn width_counts(&self) -> BTreeMap<usize, usize> {
        let mut widths = BTreeMap::new();
        for (_, vector, count) in &self.entries {
            if count.is_some() && !vector.is_empty() && vector_issue(vector).is_none() {
                *widths.entry(vector.len()).or_insert(0) += 1;
            }
        }
        widths
    }

    /// Usable records, in key order, plus counts of everything skipped.
    ///
    /// With `dimension == None` the most common width in this partition is expected. Use
    /// [`resolve_dimension`] to agree on one width across partitions.
    #[must_use]
    pub fn records(&self, dimension: Option<usize>) -> (Vec<RawRecord<'_>>, RecordSkips) {
        let mut skips = RecordSkips {
            unparsable_keys: self.unparsable_keys,
            ..RecordSkips::default()
        };
        let width = dimension.or_else(|| majority_width(&self.width_counts()));
        let mut records = Vec::with_capacity(self.entries.len());
        for (key, vector, count) in &self.entries {
            let Some(count) = *count else {
                skips.missing_counts += 1;
                continue;
            };
            match vector_issue(vector) {
                Some(VectorIssue::NonFinite) => {
                    skips.non_finite += 1;
                    continue;
                }
                Some(VectorIssue::OutOfRange) => {
                    skips.out_of_range += 1;
                    continue;
                }
                None => {}
            }
            if vector.is_empty() || Some(vector.len()) != width {
                skips.wrong_width += 1;
                continue;
            }
            records.push(RawRecord {
                key,
                vector,
                count,
            });
        }
        if skips.total() > 0 {
            log::warn!(
                "Partition {}: skipped {} of {} records ({} unparsable keys, {} without count, {} non-finite, {} out of range, {} wrong width)",
                self.key,
                skips.total(),
                self.len(),
                skips.unparsable_keys,
                skips.missing_counts,
                skips.non_finite,
                skips.out_of_range,
                skips.wrong_width
            );
        }
        (records, skips)
    }
}

enum VectorIssue {
    NonFinite,
    OutOfRange,
}

fn vector_issue(vector: &[f64]) -> Option<VectorIssue> {
    if vector.iter().any(|v| !v.is_finite()) {
        Some(VectorIssue::NonFinite)
    } else if vector.iter().any(|v| v.abs() > MAX_ABS_VALUE) {
        Some(VectorIssue::OutOfRange)
    } else {
        None
    }
}

/// Most frequent width; ties go to the smaller width.
#[must_use]
pub fn majority_width(widths: &BTreeMap<usize, usize>) -> Option<usize> {
    widths
        .iter()
        .max_by(|(wa, na), (wb, nb)| na.cmp(nb).then_with(|| wb.cmp(wa)))
        .map(|(width, _)| *width)
}

/// The most common record width over all `sources`, read in parallel.
///
/// `None` when no partition has a usable record.
pub fn resolve_dimension(sources: &[PartitionSource]) -> Result<Option<usize>> {
    let widths = sources
        .par_iter()
        .map(|source| RawPartition::load(source).map(|p| p.width_counts()))
        .try_reduce(BTreeMap::new, |mut a, b| {
            for (width, n) in b {
                *a.entry(width).or_insert(0) += n;
            }
            Ok(a)
        })?;
    let dimension = majority_width(&widths);
    if widths.len() > 1 {
        log::warn!("Raw records have mixed widths {widths:?}; expecting {dimension:?}");
    } else {
        log::debug!("Raw record width: {dimension:?}");
    }
    Ok(dimension)
}

pub fn load_term_vectors(path: impl AsRef<Path>) -> Result<TermVectors> {
    read_json(path.as_ref())
}

pub fn load_yearly_vectors(path: impl AsRef<Path>) -> Result<YearlyTermVectors> {
    read_json(path.as_ref())
}

/// Writes JSON to `path` through a temporary sibling and a rename.
pub fn save_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn discovers_partitions_with_counts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("reddit_2009.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("reddit_2009_wordcounts.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("forum_avfm.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("forum_avfm_wordcounts.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let sources = discover_partitions(tmp.path()).unwrap();
        let keys: Vec<String> = sources.iter().map(|s| s.key.to_string()).collect();
        assert_eq!(keys, vec!["forum_avfm", "reddit_2009"]);
    }

    #[test]
    fn missing_counts_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("reddit_2010.json"), "{}").unwrap();
        let err = discover_partitions(tmp.path()).unwrap_err();
        assert!(matches!(err, VectorStoreError::MissingCounts { .. }));
    }

    #[test]
    fn records_skip_and_count_bad_entries() {
        let vectors: BTreeMap<String, Vec<f64>> = [
            ("man_noun_2010", vec![1.0, 2.0]),
            ("woman_noun_2010", vec![1.0]),
            ("nocount_noun_2010", vec![1.0, 2.0]),
            ("huge_noun_2010", vec![1.0e9, 0.0]),
            ("nan_noun_2010", vec![f64::NAN, 0.0]),
            ("broken", vec![1.0, 2.0]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let counts: BTreeMap<String, u64> = [
            "man_noun_2010",
            "woman_noun_2010",
            "huge_noun_2010",
            "nan_noun_2010",
        ]
        .into_iter()
        .map(|k| (k.to_string(), 3))
        .collect();
        let partition =
            RawPartition::from_maps(PartitionKey::from_stem("reddit_2010"), vectors, &counts);

        let (records, skips) = partition.records(Some(2));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.term, "man");
        assert_eq!(
            skips,
            RecordSkips {
                unparsable_keys: 1,
                missing_counts: 1,
                non_finite: 1,
                out_of_range: 1,
                wrong_width: 1,
            }
        );
    }

    fn partition(records: &[(&str, Vec<f64>)]) -> RawPartition {
        let vectors: BTreeMap<String, Vec<f64>> = records
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let counts: BTreeMap<String, u64> = records.iter().map(|(k, _)| (k.to_string(), 1)).collect();
        RawPartition::from_maps(PartitionKey::from_stem("reddit_2010"), vectors, &counts)
    }

    #[test]
    fn odd_width_with_smallest_key_does_not_set_the_width() {
        let partition = partition(&[
            ("aaa_noun_2010", vec![1.0]),
            ("man_noun_2010", vec![1.0, 2.0]),
            ("woman_noun_2010", vec![3.0, 4.0]),
        ]);
        let (records, skips) = partition.records(None);
        let kept: Vec<&str> = records.iter().map(|r| r.key.term.as_str()).collect();
        assert_eq!(kept, vec!["man", "woman"]);
        assert_eq!(skips.wrong_width, 1);
    }

    #[test]
    fn majority_width_breaks_ties_towards_smaller() {
        let widths: BTreeMap<usize, usize> = [(2, 3), (3, 3), (1, 1)].into_iter().collect();
        assert_eq!(majority_width(&widths), Some(2));
        assert_eq!(majority_width(&BTreeMap::new()), None);
    }

    #[test]
    fn resolve_dimension_counts_across_partitions() {
        let tmp = TempDir::new().unwrap();
        let write = |stem: &str, vectors: &str, counts: &str| {
            std::fs::write(tmp.path().join(format!("{stem}.json")), vectors).unwrap();
            std::fs::write(tmp.path().join(format!("{stem}_wordcounts.json")), counts).unwrap();
        };
        write(
            "reddit_2010",
            r#"{"a_noun_2010": [1.0, 2.0, 3.0]}"#,
            r#"{"a_noun_2010": 1}"#,
        );
        write(
            "reddit_2011",
            r#"{"b_noun_2011": [1.0, 2.0], "c_noun_2011": [3.0, 4.0], "d_noun_2011": [5.0]}"#,
            r#"{"b_noun_2011": 1, "c_noun_2011": 1}"#,
        );
        let sources = discover_partitions(tmp.path()).unwrap();
        assert_eq!(resolve_dimension(&sources).unwrap(), Some(2));
        assert_eq!(resolve_dimension(&[]).unwrap(), None);
    }

    #[test]
    fn save_json_replaces_atomically() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("vectors.json");
        let mut table = TermVectors::new();
        table.insert("man".to_string(), vec![0.5, -0.5]);
        save_json(&path, &table).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_term_vectors(&path).unwrap(), table);

        let mut yearly = YearlyTermVectors::new();
        yearly.entry("man".to_string()).or_default().insert(2012, vec![1.0]);
        let ypath = tmp.path().join("yearly.json");
        save_json(&ypath, &yearly).unwrap();
        assert_eq!(load_yearly_vectors(&ypath).unwrap(), yearly);
    }
}
