//! Regex filters applied to series names returned by a rule's selector

use regex::Regex;

use crate::config::RegexFilter;
use crate::error::{RuleError, RuleResult};

#[derive(Debug, Clone)]
struct CompiledFilter {
    pattern: String,
    expect_match: bool,
    regex: Regex,
}

impl CompiledFilter {
    fn new(pattern: &str, expect_match: bool) -> RuleResult<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                source: e,
            }
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            expect_match,
            regex,
        })
    }

    fn same_as(&self, other: &CompiledFilter) -> bool {
        self.pattern == other.pattern && self.expect_match == other.expect_match
    }
}

/// An ANDed set of anchored `is` / `isNot` filters
#[derive(Debug, Clone, Default)]
pub struct RegexFilterSet {
    filters: Vec<CompiledFilter>,
}

impl RegexFilterSet {
    /// Compile the configured filters.
    ///
    /// # Errors
    ///
    /// `RuleError::InvalidFilter` when a filter sets both or neither of
    /// `is`/`isNot`, `RuleError::InvalidPattern` when a regex does not compile.
    pub fn compile(filters: &[RegexFilter]) -> RuleResult<Self> {
        let mut compiled = Vec::with_capacity(filters.len());

        for filter in filters {
            let is = filter.is.as_deref().filter(|s| !s.is_empty());
            let is_not = filter.is_not.as_deref().filter(|s| !s.is_empty());

            let entry = match (is, is_not) {
                (Some(pattern), None) => CompiledFilter::new(pattern, true)?,
                (None, Some(pattern)) => CompiledFilter::new(pattern, false)?,
                (Some(_), Some(_)) => {
                    return Err(RuleError::InvalidFilter(
                        "only one of 'is' and 'isNot' may be set".to_string(),
                    ))
                }
                (None, None) => {
                    return Err(RuleError::InvalidFilter(
                        "one of 'is' or 'isNot' must be set".to_string(),
                    ))
                }
            };
            compiled.push(entry);
        }

        Ok(Self { filters: compiled })
    }

    /// Append the implicit filters that require the naming prefix and suffix
    pub fn with_affixes(mut self, prefix: &str, suffix: &str) -> RuleResult<Self> {
        if !prefix.is_empty() {
            let pattern = format!("{}.*", regex::escape(prefix));
            self.filters.push(CompiledFilter::new(&pattern, true)?);
        }
        if !suffix.is_empty() {
            let pattern = format!(".*{}", regex::escape(suffix));
            self.filters.push(CompiledFilter::new(&pattern, true)?);
        }
        Ok(self)
    }

    /// True iff the name satisfies every filter
    pub fn matches(&self, name: &str) -> bool {
        self.filters
            .iter()
            .all(|f| f.regex.is_match(name) == f.expect_match)
    }

    /// True when every filter of `self` also appears in `other`, so `self`
    /// accepts at least everything `other` accepts.
    pub fn is_subset_of(&self, other: &RegexFilterSet) -> bool {
        self.filters
            .iter()
            .all(|mine| other.filters.iter().any(|theirs| mine.same_as(theirs)))
    }

    /// Number of filters, implicit ones included
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if the set has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Human readable description of each filter
    pub fn describe(&self) -> Vec<String> {
        self.filters
            .iter()
            .map(|f| {
                if f.expect_match {
                    format!("is {}", f.pattern)
                } else {
                    format!("isNot {}", f.pattern)
                }
            })
            .collect()
    }
}
