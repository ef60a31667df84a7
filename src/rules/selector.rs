//! Series selector parsing and evaluation
//!
//! Handles the subset of the Prometheus series-selector syntax that rules use
//! in `seriesQuery`:
//!
//! ```text
//! container_cpu_usage_seconds_total
//! container_cpu_usage_seconds_total{namespace!="",pod!=""}
//! {__name__=~"^container_.*",container!="POD"}
//! ```
//!
//! Anything outside that subset is kept as an opaque selector. Opaque selectors
//! are sent to the store unchanged and every series the store returns for them
//! is trusted.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

use crate::error::{RuleError, RuleResult};
use crate::store::Labels;

/// Label name that carries the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label matching operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchOp {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    RegexMatch,
    /// `!~`
    RegexNoMatch,
}

impl MatchOp {
    /// Returns the store syntax for the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::RegexMatch => "=~",
            MatchOp::RegexNoMatch => "!~",
        }
    }
}

/// A single `name op "value"` label matcher
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    /// Label name
    pub name: String,
    /// Matching operator
    pub op: MatchOp,
    /// Literal value or regex source
    pub value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    /// Create a matcher, compiling the value for regex operators.
    ///
    /// Regexes are fully anchored, as in Prometheus.
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> RuleResult<Self> {
        let value = value.into();
        let regex = match op {
            MatchOp::RegexMatch | MatchOp::RegexNoMatch => Some(
                Regex::new(&format!("^(?:{})$", value)).map_err(|e| RuleError::InvalidPattern {
                    pattern: value.clone(),
                    source: e,
                })?,
            ),
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name: name.into(),
            op,
            value,
            regex,
        })
    }

    /// Equality matcher, which never fails to build
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
            regex: None,
        }
    }

    /// Regex matcher accepting any of the given literal values
    pub fn any_of<S: AsRef<str>>(name: impl Into<String>, values: &[S]) -> Self {
        if let [single] = values {
            return Self::equal(name, single.as_ref());
        }
        let alternation = values
            .iter()
            .map(|v| regex::escape(v.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        // Escaped literals joined by '|' always form a valid regex.
        let regex = Regex::new(&format!("^(?:{})$", alternation)).ok();
        Self {
            name: name.into(),
            op: MatchOp::RegexMatch,
            value: alternation,
            regex,
        }
    }

    /// Evaluate against a label value; a missing label counts as empty
    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::RegexMatch, Some(re)) => re.is_match(value),
            (MatchOp::RegexNoMatch, Some(re)) => !re.is_match(value),
            (_, None) => false,
        }
    }

    /// Whether two matchers on the same label can never both hold
    fn excludes(&self, other: &LabelMatcher) -> bool {
        if self.name != other.name {
            return false;
        }
        match (self.op, other.op) {
            (MatchOp::Equal, MatchOp::Equal) => self.value != other.value,
            (MatchOp::Equal, _) => !other.matches(Some(&self.value)),
            (_, MatchOp::Equal) => !self.matches(Some(&other.value)),
            _ => false,
        }
    }

    fn sort_key(&self) -> (&str, MatchOp, &str) {
        (&self.name, self.op, &self.value)
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for LabelMatcher {}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"", self.name, self.op.as_str())?;
        for c in self.value.chars() {
            match c {
                '\\' => f.write_str("\\\\")?,
                '"' => f.write_str("\\\"")?,
                '\n' => f.write_str("\\n")?,
                _ => write!(f, "{}", c)?,
            }
        }
        f.write_str("\"")
    }
}

/// A compiled series selector
#[derive(Debug, Clone)]
pub struct Selector {
    raw: String,
    matchers: Option<Vec<LabelMatcher>>,
}

impl Selector {
    /// Parse a selector string.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidSelector` only for an empty selector; syntax
    /// outside the supported subset produces an opaque selector instead.
    pub fn parse(raw: &str) -> RuleResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RuleError::InvalidSelector {
                selector: raw.to_string(),
                reason: "selector is empty".to_string(),
            });
        }

        let matchers = match parse_matchers(trimmed) {
            Ok(mut matchers) => {
                matchers.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                matchers.dedup();
                Some(matchers)
            }
            Err(reason) => {
                tracing::debug!(
                    selector = %trimmed,
                    reason = %reason,
                    "Selector outside the supported subset, treating as opaque"
                );
                None
            }
        };

        Ok(Self {
            raw: trimmed.to_string(),
            matchers,
        })
    }

    /// The selector as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the selector could not be parsed structurally
    pub fn is_opaque(&self) -> bool {
        self.matchers.is_none()
    }

    /// Parsed matchers, sorted; empty for opaque selectors
    pub fn matchers(&self) -> &[LabelMatcher] {
        self.matchers.as_deref().unwrap_or(&[])
    }

    /// The metric family this selector is pinned to, if any
    pub fn metric_name(&self) -> Option<&str> {
        self.matchers()
            .iter()
            .find(|m| m.name == METRIC_NAME_LABEL && m.op == MatchOp::Equal)
            .map(|m| m.value.as_str())
    }

    /// Evaluate the selector against a concrete series
    pub fn matches(&self, name: &str, labels: &Labels) -> bool {
        let Some(matchers) = &self.matchers else {
            return true;
        };
        matchers.iter().all(|m| {
            if m.name == METRIC_NAME_LABEL {
                m.matches(Some(name))
            } else {
                m.matches(labels.get(&m.name).map(String::as_str))
            }
        })
    }

    /// True when every series selected by `other` is also selected by `self`,
    /// judged structurally: each matcher of `self` also appears in `other`.
    pub fn subsumes(&self, other: &Selector) -> bool {
        match (&self.matchers, &other.matchers) {
            (Some(mine), Some(theirs)) => mine.iter().all(|m| theirs.contains(m)),
            _ => self.raw == other.raw,
        }
    }

    /// True when no series can satisfy both selectors
    pub fn is_disjoint(&self, other: &Selector) -> bool {
        match (&self.matchers, &other.matchers) {
            (Some(mine), Some(theirs)) => mine
                .iter()
                .any(|a| theirs.iter().any(|b| a.excludes(b))),
            _ => false,
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        match (&self.matchers, &other.matchers) {
            (Some(a), Some(b)) => a == b,
            _ => self.raw == other.raw,
        }
    }
}

impl Eq for Selector {}

impl PartialOrd for LabelMatcher {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LabelMatcher {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Parse `name{label op "value", ...}` into matchers
fn parse_matchers(input: &str) -> Result<Vec<LabelMatcher>, String> {
    let mut chars = input.chars().peekable();
    let mut matchers = Vec::new();

    let mut metric = String::new();
    if chars.peek().is_some_and(|c| is_name_start(*c)) {
        while let Some(&c) = chars.peek() {
            if !is_name_char(c) {
                break;
            }
            metric.push(c);
            chars.next();
        }
        matchers.push(LabelMatcher::equal(METRIC_NAME_LABEL, metric.clone()));
    }

    skip_whitespace(&mut chars);
    match chars.next() {
        None if !metric.is_empty() => return Ok(matchers),
        None => return Err("expected metric name or '{'".to_string()),
        Some('{') => {}
        Some(c) => return Err(format!("unexpected character '{}'", c)),
    }

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            Some('}') => {
                chars.next();
                break;
            }
            None => return Err("unterminated '{'".to_string()),
            _ => {}
        }

        let mut label = String::new();
        while let Some(&c) = chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            label.push(c);
            chars.next();
        }
        if label.is_empty() || label.starts_with(|c: char| c.is_ascii_digit()) {
            return Err("expected label name".to_string());
        }

        skip_whitespace(&mut chars);
        let op = match (chars.next(), chars.peek().copied()) {
            (Some('='), Some('~')) => {
                chars.next();
                MatchOp::RegexMatch
            }
            (Some('='), _) => MatchOp::Equal,
            (Some('!'), Some('=')) => {
                chars.next();
                MatchOp::NotEqual
            }
            (Some('!'), Some('~')) => {
                chars.next();
                MatchOp::RegexNoMatch
            }
            _ => return Err(format!("expected operator after label '{}'", label)),
        };

        skip_whitespace(&mut chars);
        let value = parse_quoted(&mut chars)?;
        let matcher = LabelMatcher::new(label, op, value).map_err(|e| e.to_string())?;
        matchers.push(matcher);

        skip_whitespace(&mut chars);
        match chars.next() {
            Some(',') => continue,
            Some('}') => break,
            _ => return Err("expected ',' or '}'".to_string()),
        }
    }

    skip_whitespace(&mut chars);
    if let Some(c) = chars.next() {
        return Err(format!("trailing input starting at '{}'", c));
    }
    if matchers.is_empty() {
        return Err("selector has no matchers".to_string());
    }

    Ok(matchers)
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn parse_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let quote = match chars.next() {
        Some(q @ ('"' | '\'' | '`')) => q,
        _ => return Err("expected quoted value".to_string()),
    };

    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == quote {
            return Ok(value);
        }
        if c == '\\' && quote != '`' {
            match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some(escaped) => {
                    // Keep regex escapes such as `\.` intact
                    if escaped != quote && escaped != '\\' {
                        value.push('\\');
                    }
                    value.push(escaped);
                }
                None => break,
            }
        } else {
            value.push(c);
        }
    }

    Err("unterminated string".to_string())
}
