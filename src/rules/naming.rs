//! Metric name mapping between store names and API names

use crate::config::NameMapping;
use crate::error::{MappingError, RuleError, RuleResult};

/// Bidirectional metric name transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMapper {
    /// Strip a prefix and/or suffix from store names
    Affix { prefix: String, suffix: String },
    /// Expose every matched series under one fixed name
    Constant { name: String },
}

impl NameMapper {
    /// Build a mapper from configuration.
    ///
    /// # Errors
    ///
    /// `RuleError::ConflictingNaming` if `constantName` is combined with a
    /// prefix or suffix.
    pub fn compile(naming: &NameMapping) -> RuleResult<Self> {
        let prefix = naming.prefix.clone().unwrap_or_default();
        let suffix = naming.suffix.clone().unwrap_or_default();

        match naming.constant_name.as_deref().filter(|s| !s.is_empty()) {
            Some(name) if prefix.is_empty() && suffix.is_empty() => Ok(NameMapper::Constant {
                name: name.to_string(),
            }),
            Some(name) => Err(RuleError::ConflictingNaming {
                name: name.to_string(),
            }),
            None => Ok(NameMapper::Affix { prefix, suffix }),
        }
    }

    /// Store name to API name
    pub fn to_api_name(&self, store_name: &str) -> Result<String, MappingError> {
        match self {
            NameMapper::Constant { name } => Ok(name.clone()),
            NameMapper::Affix { prefix, suffix } => store_name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
                .ok_or_else(|| MappingError::NameMismatch {
                    name: store_name.to_string(),
                    prefix: prefix.clone(),
                    suffix: suffix.clone(),
                }),
        }
    }

    /// API name to store name.
    ///
    /// Constant names cannot be reversed from the name alone; callers that know
    /// the originating series must use it instead.
    pub fn to_store_name(&self, api_name: &str) -> Result<String, MappingError> {
        match self {
            NameMapper::Constant { name } => Err(MappingError::AmbiguousReverseMapping {
                name: name.clone(),
            }),
            NameMapper::Affix { prefix, suffix } => Ok(format!("{}{}{}", prefix, api_name, suffix)),
        }
    }

    /// Prefix stripped from store names, empty for constant names
    pub fn prefix(&self) -> &str {
        match self {
            NameMapper::Affix { prefix, .. } => prefix,
            NameMapper::Constant { .. } => "",
        }
    }

    /// Suffix stripped from store names, empty for constant names
    pub fn suffix(&self) -> &str {
        match self {
            NameMapper::Affix { suffix, .. } => suffix,
            NameMapper::Constant { .. } => "",
        }
    }

    /// The constant API name, if configured
    pub fn constant_name(&self) -> Option<&str> {
        match self {
            NameMapper::Constant { name } => Some(name),
            NameMapper::Affix { .. } => None,
        }
    }
}
