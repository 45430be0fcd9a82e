//! Attribute exclusion rules
//!
//! An attribute is excluded when its name equals one of the configured names
//! or matches one of the configured regex patterns.

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

/// Patterns excluded unless the configuration says otherwise
pub const DEFAULT_PATTERNS: &[&str] = &[
    // Offsets into the file (directory record links, frame offsets)
    "Offset",
    "UID$",
    "^PrivateCreator$",
    "GroupLength$",
    // Unnamed or unknown attributes are reported with spaces in their name
    " ",
];

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid exclusion pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Names and patterns of attributes that never appear in a parsed tree
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl ExclusionRules {
    /// Builds rules from exact names and regex patterns
    pub fn new<N, P>(names: N, patterns: P) -> Result<Self, FilterError>
    where
        N: IntoIterator,
        N::Item: Into<String>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            names: names.into_iter().map(Into::into).collect(),
            patterns,
        })
    }

    /// Rules that exclude nothing
    pub fn none() -> Self {
        Self {
            names: HashSet::new(),
            patterns: Vec::new(),
        }
    }

    /// Returns true if the attribute name must be dropped
    pub fn is_excluded(&self, name: &str) -> bool {
        self.names.contains(name) || self.patterns.iter().any(|re| re.is_match(name))
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self::new(Vec::<String>::new(), DEFAULT_PATTERNS)
            .expect("default exclusion patterns are valid")
    }
}
