//! `${Name}` placeholder tokenizer shared by resource and query templates

use crate::error::{RuleError, RuleResult};

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    /// Literal text copied verbatim
    Literal(String),
    /// A `${Name}` placeholder, holding the placeholder name
    Placeholder(&'static str),
}

/// Split a template into literal text and known placeholders.
///
/// A `$` that is not followed by `{` is literal. Unknown placeholder names and
/// unterminated `${` are rejected.
pub(crate) fn parse(template: &str, allowed: &[&'static str]) -> RuleResult<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| RuleError::InvalidTemplate {
            template: template.to_string(),
            reason: "unterminated '${'".to_string(),
        })?;

        let name = after[..end].trim();
        let known = allowed
            .iter()
            .find(|candidate| **candidate == name)
            .ok_or_else(|| RuleError::InvalidTemplate {
                template: template.to_string(),
                reason: format!(
                    "unknown placeholder '${{{}}}', expected one of: {}",
                    name,
                    allowed
                        .iter()
                        .map(|a| format!("${{{}}}", a))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;

        if !literal.is_empty() {
            pieces.push(Piece::Literal(std::mem::take(&mut literal)));
        }
        pieces.push(Piece::Placeholder(known));
        rest = &after[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }

    Ok(pieces)
}
