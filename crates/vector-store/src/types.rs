use serde::{Deserialize, Serialize};
use std::fmt;

/// Year literal used in raw keys for records without a year.
pub const NO_YEAR: &str = "None";

/// Raw embedding key, stored on disk as `term_category_year`.
///
/// The term runs up to the first `_`, the year follows the last `_`, and everything in
/// between is the category (categories may themselves contain `_`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EmbeddingKey {
    pub term: String,
    pub category: String,
    pub year: Option<i32>,
}

impl EmbeddingKey {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (term, rest) = raw.split_once('_')?;
        let (category, year) = rest.rsplit_once('_')?;
        if term.is_empty() || category.is_empty() {
            return None;
        }
        let year = match year {
            NO_YEAR => None,
            digits => Some(digits.parse().ok()?),
        };
        Some(Self {
            term: term.to_string(),
            category: category.to_string(),
            year,
        })
    }
}

impl fmt::Display for EmbeddingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{}_{}_{}", self.term, self.category, year),
            None => write!(f, "{}_{}_{}", self.term, self.category, NO_YEAR),
        }
    }
}

/// Identity of one raw partition, parsed from its file stem (`reddit_2008`, `forum_mgtow`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub source: String,
    pub year: Option<i32>,
}

impl PartitionKey {
    #[must_use]
    pub fn from_stem(stem: &str) -> Self {
        if let Some((source, tail)) = stem.rsplit_once('_') {
            if !source.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(year) = tail.parse() {
                    return Self {
                        source: source.to_string(),
                        year: Some(year),
                    };
                }
            }
        }
        Self {
            source: stem.to_string(),
            year: None,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{}_{}", self.source, year),
            None => f.write_str(&self.source),
        }
    }
}

/// Aggregation key. `year` is only set when aggregating per year.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub term: String,
    pub year: Option<i32>,
}

impl GroupKey {
    pub fn overall(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            year: None,
        }
    }

    pub fn yearly(term: impl Into<String>, year: i32) -> Self {
        Self {
            term: term.into(),
            year: Some(year),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    Overall,
    Yearly,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedding_key_splits_on_first_and_last_underscore() {
        let key = EmbeddingKey::parse("incel_forum_red_pill_2015").unwrap();
        assert_eq!(key.term, "incel");
        assert_eq!(key.category, "forum_red_pill");
        assert_eq!(key.year, Some(2015));
        assert_eq!(key.to_string(), "incel_forum_red_pill_2015");

        let key = EmbeddingKey::parse("women_noun_None").unwrap();
        assert_eq!(key.year, None);
        assert_eq!(key.to_string(), "women_noun_None");
    }

    #[test]
    fn embedding_key_rejects_malformed() {
        assert_eq!(EmbeddingKey::parse("women"), None);
        assert_eq!(EmbeddingKey::parse("women_noun"), None);
        assert_eq!(EmbeddingKey::parse("women_noun_nineties"), None);
        assert_eq!(EmbeddingKey::parse("_noun_2010"), None);
    }

    #[test]
    fn partition_key_from_stem() {
        assert_eq!(
            PartitionKey::from_stem("reddit_2008"),
            PartitionKey {
                source: "reddit".to_string(),
                year: Some(2008),
            }
        );
        let forum = PartitionKey::from_stem("forum_pua_forum");
        assert_eq!(forum.source, "forum_pua_forum");
        assert_eq!(forum.year, None);
    }
}
