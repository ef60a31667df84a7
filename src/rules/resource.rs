//! Mapping between Kubernetes group-resources and series label names
//!
//! A rule's `resources` section combines a template such as
//! `kube_${Group}_${Resource}` with explicit per-label overrides. Overrides
//! always win over the template, in both directions.
//!
//! Group-resources are always plural, as in API paths (`pods`,
//! `deployments.apps`). Templates work on the singular form, so
//! `${Resource}` renders `pods` as `pod` and a `pod` label inverts back to
//! `pods`. Overrides are taken as written.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::template::{self, Piece};
use crate::config::ResourceMapping;
use crate::error::{MappingError, RuleError, RuleResult};

const GROUP: &str = "Group";
const RESOURCE: &str = "Resource";

/// A Kubernetes API group paired with a resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    /// API group, empty for the core group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Resource kind
    pub resource: String,
}

impl GroupResource {
    /// Create a group-resource
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// Create a group-resource in the core API group
    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }

    /// Parse the `resource[.group]` form used in API paths
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::core(s),
        }
    }

    /// True for namespace resources of the core group
    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && (self.resource == "namespace" || self.resource == "namespaces")
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Names whose singular and plural forms are the same
const INVARIANT: &[&str] = &["endpoints"];

fn singularize(resource: &str) -> String {
    if INVARIANT.contains(&resource) {
        return resource.to_string();
    }
    if let Some(stem) = resource.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if resource.ends_with(suffix) {
            return resource[..resource.len() - 2].to_string();
        }
    }
    match resource.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with('s') => stem.to_string(),
        _ => resource.to_string(),
    }
}

fn pluralize(resource: &str) -> String {
    if INVARIANT.contains(&resource) {
        return resource.to_string();
    }
    if let Some(stem) = resource.strip_suffix('y') {
        if !stem.is_empty() && !stem.ends_with(|c: char| "aeiou".contains(c)) {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "ch", "sh"].iter().any(|s| resource.ends_with(*s)) {
        return format!("{}es", resource);
    }
    format!("{}s", resource)
}

/// Shape of a template that can be read backwards
#[derive(Debug, Clone)]
enum Inversion {
    ResourceOnly,
    GroupFirst { separator: String },
    ResourceFirst { separator: String },
}

#[derive(Debug, Clone)]
struct LabelTemplate {
    raw: String,
    pieces: Vec<Piece>,
    leading: String,
    trailing: String,
    inversion: Option<Inversion>,
}

impl LabelTemplate {
    fn compile(raw: &str) -> RuleResult<Self> {
        let pieces = template::parse(raw, &[GROUP, RESOURCE])?;

        let placeholders = pieces
            .iter()
            .filter(|p| matches!(p, Piece::Placeholder(_)))
            .count();
        let resources = pieces
            .iter()
            .filter(|p| **p == Piece::Placeholder(RESOURCE))
            .count();
        if resources == 0 {
            return Err(RuleError::InvalidTemplate {
                template: raw.to_string(),
                reason: "template must reference ${Resource}".to_string(),
            });
        }

        let leading = match pieces.first() {
            Some(Piece::Literal(text)) => text.clone(),
            _ => String::new(),
        };
        let trailing = match pieces.last() {
            Some(Piece::Literal(text)) if pieces.len() > 1 => text.clone(),
            _ => String::new(),
        };

        let core: Vec<&Piece> = pieces
            .iter()
            .skip(usize::from(!leading.is_empty()))
            .take(pieces.len() - usize::from(!leading.is_empty()) - usize::from(!trailing.is_empty()))
            .collect();

        let inversion = match core.as_slice() {
            [Piece::Placeholder(RESOURCE)] => Some(Inversion::ResourceOnly),
            [Piece::Placeholder(GROUP), Piece::Literal(sep), Piece::Placeholder(RESOURCE)] => {
                Some(Inversion::GroupFirst {
                    separator: sep.clone(),
                })
            }
            [Piece::Placeholder(RESOURCE), Piece::Literal(sep), Piece::Placeholder(GROUP)] => {
                Some(Inversion::ResourceFirst {
                    separator: sep.clone(),
                })
            }
            _ => None,
        };

        if inversion.is_none() {
            tracing::debug!(
                template = %raw,
                placeholders,
                "Resource template cannot be inverted; labels resolve through overrides only"
            );
        }

        Ok(Self {
            raw: raw.to_string(),
            pieces,
            leading,
            trailing,
            inversion,
        })
    }

    fn render(&self, resource: &GroupResource) -> String {
        let mut out = String::with_capacity(self.raw.len() + resource.resource.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder(GROUP) => out.push_str(&resource.group.replace('.', "_")),
                Piece::Placeholder(_) => out.push_str(&singularize(&resource.resource)),
            }
        }
        out
    }

    fn invert(&self, label: &str) -> Option<GroupResource> {
        let inversion = self.inversion.as_ref()?;
        let inner = label
            .strip_prefix(self.leading.as_str())?
            .strip_suffix(self.trailing.as_str())?;

        let (group, resource) = match inversion {
            Inversion::ResourceOnly => ("", inner),
            Inversion::GroupFirst { separator } => inner.rsplit_once(separator.as_str())?,
            Inversion::ResourceFirst { separator } => {
                let (resource, group) = inner.split_once(separator.as_str())?;
                (group, resource)
            }
        };

        if resource.is_empty() {
            return None;
        }
        Some(GroupResource::new(group.replace('_', "."), pluralize(resource)))
    }
}

/// Compiled `resources` section of a rule
#[derive(Debug, Clone, Default)]
pub struct ResourceTemplate {
    template: Option<LabelTemplate>,
    overrides: HashMap<String, GroupResource>,
    by_resource: HashMap<GroupResource, String>,
}

impl ResourceTemplate {
    /// Compile the template and index the overrides by group-resource.
    ///
    /// # Errors
    ///
    /// `RuleError::InvalidTemplate` for malformed templates and
    /// `RuleError::DuplicateOverride` when two labels map to one group-resource.
    pub fn compile(mapping: &ResourceMapping) -> RuleResult<Self> {
        let template = mapping
            .template
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(LabelTemplate::compile)
            .transpose()?;

        let mut labels: Vec<&String> = mapping.overrides.keys().collect();
        labels.sort();

        let mut by_resource: HashMap<GroupResource, String> = HashMap::new();
        for label in labels {
            let resource = &mapping.overrides[label];
            if resource.resource.is_empty() {
                return Err(RuleError::InvalidTemplate {
                    template: label.clone(),
                    reason: "override has an empty resource".to_string(),
                });
            }
            if let Some(first) = by_resource.get(resource) {
                return Err(RuleError::DuplicateOverride {
                    first: first.clone(),
                    second: label.clone(),
                    resource: resource.clone(),
                });
            }
            by_resource.insert(resource.clone(), label.clone());
        }

        Ok(Self {
            template,
            overrides: mapping.overrides.clone(),
            by_resource,
        })
    }

    /// Label carrying the name of objects of the given group-resource.
    ///
    /// # Errors
    ///
    /// `MappingError::ReverseMappingUnsupported` when no override covers the
    /// resource and there is no template, or when the rendered label is taken
    /// by an override for a different resource.
    pub fn label_for_resource(&self, resource: &GroupResource) -> Result<String, MappingError> {
        if let Some(label) = self.by_resource.get(resource) {
            return Ok(label.clone());
        }

        let unsupported = || MappingError::ReverseMappingUnsupported {
            resource: resource.clone(),
        };
        let label = self
            .template
            .as_ref()
            .map(|t| t.render(resource))
            .ok_or_else(unsupported)?;

        if self.overrides.contains_key(&label) {
            return Err(unsupported());
        }
        Ok(label)
    }

    /// Group-resource named by a series label, if the label resolves to one
    pub fn resource_for_label(&self, label: &str) -> Option<GroupResource> {
        if let Some(resource) = self.overrides.get(label) {
            return Some(resource.clone());
        }
        self.template.as_ref()?.invert(label)
    }

    /// Label carrying the namespace, if the mapping resolves namespaces
    pub fn namespace_label(&self) -> Option<String> {
        let mut overridden: Vec<(&GroupResource, &String)> = self
            .by_resource
            .iter()
            .filter(|(resource, _)| resource.is_namespace())
            .collect();
        overridden.sort();
        if let Some((_, label)) = overridden.first() {
            return Some((*label).clone());
        }
        self.label_for_resource(&GroupResource::core("namespaces")).ok()
    }

    /// True when labels can be mapped back through the template
    pub fn is_invertible(&self) -> bool {
        self.template
            .as_ref()
            .is_some_and(|t| t.inversion.is_some())
    }

    /// The template as configured
    pub fn template(&self) -> Option<&str> {
        self.template.as_ref().map(|t| t.raw.as_str())
    }

    /// Configured overrides
    pub fn overrides(&self) -> &HashMap<String, GroupResource> {
        &self.overrides
    }
}
