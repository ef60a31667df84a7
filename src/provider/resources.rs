//! Kubernetes object lookup
//!
//! The provider asks a [`ResourceLister`] whether a described object exists
//! and which objects a label selector selects. [`StaticResourceLister`] serves
//! a fixed object list from configuration.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::ObjectConfig;
use crate::error::ProviderError;
use crate::rules::GroupResource;
use crate::store::Labels;

/// Kubernetes label key, with an optional DNS prefix
static LABEL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9]([-a-z0-9.]*[a-z0-9])?/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$")
        .expect("label key pattern is valid")
});

/// Identity of one live object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceRef {
    pub resource: GroupResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// Source of truth for which objects exist
#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// Check whether an object exists
    async fn resource_exists(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, ProviderError>;

    /// List objects of a kind matching a label selector
    async fn list_resources(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceRef>, ProviderError>;

    /// Whether the lister knows the resource kind at all.
    ///
    /// Catalog entries for unknown kinds are dropped during discovery.
    fn is_known(&self, _resource: &GroupResource) -> bool {
        true
    }
}

/// One equality-based requirement
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &Labels) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// Equality-based label selector (`app=web,tier!=cache,canary,!legacy`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse a selector string
    ///
    /// # Errors
    ///
    /// `ProviderError::InvalidLabelSelector` for set-based syntax or malformed keys.
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        let invalid = || ProviderError::InvalidLabelSelector(raw.to_string());
        let mut requirements = Vec::new();

        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::NotExists(key.trim().to_string())
            } else {
                Requirement::Exists(term.to_string())
            };

            let key = match &requirement {
                Requirement::Equals(k, _)
                | Requirement::NotEquals(k, _)
                | Requirement::Exists(k)
                | Requirement::NotExists(k) => k,
            };
            if !LABEL_KEY.is_match(key) {
                return Err(invalid());
            }
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    /// Check an object's labels
    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Selector without requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

#[derive(Debug, Clone)]
struct StaticObject {
    reference: ResourceRef,
    labels: Labels,
}

/// In-memory lister over a fixed set of objects
#[derive(Debug, Clone, Default)]
pub struct StaticResourceLister {
    objects: Vec<StaticObject>,
}

impl StaticResourceLister {
    /// Create an empty lister
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lister from configured objects
    pub fn from_config(objects: &[ObjectConfig]) -> Self {
        objects.iter().fold(Self::new(), |lister, object| {
            lister.with_object(
                GroupResource::parse(&object.resource),
                object.namespace.as_deref(),
                &object.name,
                object.labels.clone(),
            )
        })
    }

    /// Add an object
    pub fn with_object(
        mut self,
        resource: GroupResource,
        namespace: Option<&str>,
        name: &str,
        labels: Labels,
    ) -> Self {
        self.objects.push(StaticObject {
            reference: ResourceRef {
                resource,
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
            },
            labels,
        });
        self
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the lister holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn in_scope<'a>(
        &'a self,
        resource: &'a GroupResource,
        namespace: Option<&'a str>,
    ) -> impl Iterator<Item = &'a StaticObject> + 'a {
        self.objects.iter().filter(move |o| {
            o.reference.resource == *resource
                && (namespace.is_none() || o.reference.namespace.as_deref() == namespace)
        })
    }
}

#[async_trait]
impl ResourceLister for StaticResourceLister {
    async fn resource_exists(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, ProviderError> {
        Ok(self
            .in_scope(resource, namespace)
            .any(|o| o.reference.name == name))
    }

    async fn list_resources(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceRef>, ProviderError> {
        let mut refs: Vec<ResourceRef> = self
            .in_scope(resource, namespace)
            .filter(|o| selector.matches(&o.labels))
            .map(|o| o.reference.clone())
            .collect();
        refs.sort();
        Ok(refs)
    }

    fn is_known(&self, resource: &GroupResource) -> bool {
        resource.is_namespace() || self.objects.iter().any(|o| o.reference.resource == *resource)
    }
}
