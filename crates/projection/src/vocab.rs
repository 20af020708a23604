use crate::error::{ProjectionError, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Positional order of the terms that score lists are aligned to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VocabularyOrder {
    terms: Vec<String>,
}

impl VocabularyOrder {
    /// Lexicographic order over `terms`.
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = terms.into_iter().map(Into::into).collect();
        Self {
            terms: set.into_iter().collect(),
        }
    }

    /// One term per line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let terms = raw
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { terms })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("txt.tmp");
        std::fs::write(&tmp, self.to_text())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// One term per line, no trailing newline.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.terms.join("\n")
    }

    /// Reuses the order persisted at `path` when there is one, else generates it from
    /// `terms`. A persisted order over a different term set is an error.
    ///
    /// Returns the order and whether it was reused.
    pub fn resolve(path: impl AsRef<Path>, terms: &BTreeSet<String>) -> Result<(Self, bool)> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Generating vocabulary order for {} terms", terms.len());
            return Ok((Self::from_terms(terms.iter().cloned()), false));
        }
        let existing = Self::load(path)?;
        existing.ensure_same_terms(terms)?;
        log::info!(
            "Reusing vocabulary order from {:?} ({} terms)",
            path,
            existing.len()
        );
        Ok((existing, true))
    }

    pub fn ensure_same_terms(&self, terms: &BTreeSet<String>) -> Result<()> {
        let ours: BTreeSet<&str> = self.terms.iter().map(String::as_str).collect();
        let missing: Vec<&str> = ours
            .iter()
            .copied()
            .filter(|t| !terms.contains(*t))
            .collect();
        let unexpected: Vec<&str> = terms
            .iter()
            .map(String::as_str)
            .filter(|t| !ours.contains(t))
            .collect();
        if missing.is_empty() && unexpected.is_empty() && ours.len() == self.terms.len() {
            return Ok(());
        }
        let example = unexpected
            .first()
            .or_else(|| missing.first())
            .map_or_else(|| "duplicate terms".to_string(), |t| format!("'{t}'"));
        Err(ProjectionError::VocabularyMismatch {
            missing: missing.len(),
            unexpected: unexpected.len(),
            example,
        })
    }

    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn set(terms: &[&str]) -> BTreeSet<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn generated_order_is_lexicographic() {
        let order = VocabularyOrder::from_terms(["woman", "man", "boy", "man"]);
        assert_eq!(order.terms(), ["boy", "man", "woman"]);
    }

    #[test]
    fn persisted_order_is_reused_and_never_extended() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vocab_order.txt");

        let (order, reused) = VocabularyOrder::resolve(&path, &set(&["apple", "banana"])).unwrap();
        assert!(!reused);
        order.save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "apple\nbanana");

        let (again, reused) = VocabularyOrder::resolve(&path, &set(&["banana", "apple"])).unwrap();
        assert!(reused);
        assert_eq!(again, order);

        let err =
            VocabularyOrder::resolve(&path, &set(&["apple", "banana", "cherry"])).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::VocabularyMismatch {
                missing: 0,
                unexpected: 1,
                ..
            }
        ));
        assert_eq!(VocabularyOrder::load(&path).unwrap(), order);
    }

    #[test]
    fn persisted_order_need_not_be_sorted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vocab_order.txt");
        std::fs::write(&path, "zebra\nant\n").unwrap();
        let (order, reused) = VocabularyOrder::resolve(&path, &set(&["ant", "zebra"])).unwrap();
        assert!(reused);
        assert_eq!(order.terms(), ["zebra", "ant"]);
    }
}
