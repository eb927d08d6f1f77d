//! Filtering intensity levels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ShieldError;

/// Per-site or default filtering intensity.
///
/// Ordered: a higher level implies broader capability and, from
/// [`FilteringLevel::Optimal`] up, requires a host permission grant covering
/// the site. On the wire a level is its numeric rank (`0..=3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FilteringLevel {
    Disabled = 0,
    Basic = 1,
    Optimal = 2,
    Complete = 3,
}

impl FilteringLevel {
    pub const ALL: [FilteringLevel; 4] = [
        FilteringLevel::Disabled,
        FilteringLevel::Basic,
        FilteringLevel::Optimal,
        FilteringLevel::Complete,
    ];

    /// Whether this level needs a permission grant for the site.
    pub fn requires_grant(self) -> bool {
        self >= FilteringLevel::Optimal
    }

    /// Highest level reachable without any permission grant.
    pub fn max_ungranted() -> Self {
        FilteringLevel::Basic
    }

    /// Clamp to what is allowed given whether the site is covered by a grant.
    pub fn clamp_to_grant(self, covered: bool) -> Self {
        if self.requires_grant() && !covered {
            Self::max_ungranted()
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilteringLevel::Disabled => "none",
            FilteringLevel::Basic => "basic",
            FilteringLevel::Optimal => "optimal",
            FilteringLevel::Complete => "complete",
        }
    }
}

impl Default for FilteringLevel {
    fn default() -> Self {
        FilteringLevel::Basic
    }
}

impl fmt::Display for FilteringLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for FilteringLevel {
    type Error = ShieldError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(FilteringLevel::Disabled),
            1 => Ok(FilteringLevel::Basic),
            2 => Ok(FilteringLevel::Optimal),
            3 => Ok(FilteringLevel::Complete),
            other => Err(ShieldError::BadRequest(format!("invalid filtering level: {other}"))),
        }
    }
}

impl From<FilteringLevel> for u8 {
    fn from(level: FilteringLevel) -> u8 {
        level as u8
    }
}
