use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Thesaurus identifier of an axis, e.g. `strong.a.01`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisId(String);

impl AxisId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AxisId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AxisId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of one axis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoleKey {
    pub axis: AxisId,
    pub side: Side,
}

impl PoleKey {
    pub fn new(axis: impl Into<AxisId>, side: Side) -> Self {
        Self {
            axis: axis.into(),
            side,
        }
    }

    #[must_use]
    pub fn opposite(&self) -> Self {
        Self {
            axis: self.axis.clone(),
            side: self.side.opposite(),
        }
    }
}

impl fmt::Display for PoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.axis, self.side)
    }
}

/// A bipolar contrast. Poles are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub id: AxisId,
    pub left: BTreeSet<String>,
    pub right: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Axis {
    #[must_use]
    pub const fn pole(&self, side: Side) -> &BTreeSet<String> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    #[must_use]
    pub fn same_poles(&self, other: &Self) -> bool {
        self.left == other.left && self.right == other.right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parse_and_opposite() {
        assert_eq!(Side::parse(" Left "), Some(Side::Left));
        assert_eq!(Side::parse("RIGHT"), Some(Side::Right));
        assert_eq!(Side::parse("middle"), None);
        assert_eq!(Side::Left.opposite(), Side::Right);
    }

    #[test]
    fn pole_key_serializes_structurally() {
        let key = PoleKey::new("strong.a.01", Side::Right);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"axis":"strong.a.01","side":"right"}"#);
        assert_eq!(key.opposite().side, Side::Left);
        assert_eq!(key.to_string(), "strong.a.01/right");
    }
}
