//! Typed payloads carried by watch events.
//!
//! Each spec is decoded from the event's JSON payload and validated
//! before it reaches the store. Unknown fields are rejected so that a
//! typo in a watcher payload surfaces as a malformed event instead of
//! being silently ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One backend process serving a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReplicaSpec {
    /// `host:port` the dispatcher forwards to.
    pub endpoint: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ready: bool,
}

impl ReplicaSpec {
    pub fn validate(&self) -> Result<(), String> {
        let (host, port) = self
            .endpoint
            .rsplit_once(':')
            .ok_or_else(|| format!("endpoint {:?} has no port", self.endpoint))?;
        if host.is_empty() {
            return Err(format!("endpoint {:?} has no host", self.endpoint));
        }
        port.parse::<u16>()
            .map_err(|_| format!("endpoint {:?} has invalid port", self.endpoint))?;
        Ok(())
    }
}

/// Path match type for a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMatchType {
    Exact,
    #[default]
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMatch {
    #[serde(rename = "type", default)]
    pub match_type: PathMatchType,
    pub value: String,
}

impl PathMatch {
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            match_type: PathMatchType::Prefix,
            value: value.into(),
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            match_type: PathMatchType::Exact,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderMatchType {
    #[default]
    Exact,
    Prefix,
}

/// Header predicate. Header names compare case-insensitively, values exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderMatch {
    pub name: String,
    #[serde(rename = "type", default)]
    pub match_type: HeaderMatchType,
    pub value: String,
}

/// One scoring plugin activation: plugin name plus its opaque arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl PluginConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub plugins: Vec<PluginConfig>,
}

/// Match rule plus the backend groups and scoring policy it routes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteSpec {
    /// Empty matches every host.
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// `None` matches every path.
    #[serde(default)]
    pub path: Option<PathMatch>,
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
    /// Backend group names in the route's namespace.
    #[serde(default)]
    pub backend_groups: Vec<String>,
    /// `None` activates the router's default plugins.
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

impl RouteSpec {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.path {
            if !path.value.starts_with('/') {
                return Err(format!("path {:?} must start with '/'", path.value));
            }
        }
        if self.hostnames.iter().any(String::is_empty) {
            return Err("hostnames must not be empty".to_string());
        }
        if let Some(header) = self.headers.iter().find(|h| h.name.is_empty()) {
            return Err(format!("header match with empty name (value {:?})", header.value));
        }
        if self.backend_groups.iter().any(|g| g.is_empty() || g.contains('/')) {
            return Err("backend group references must be plain names".to_string());
        }
        Ok(())
    }
}

/// Named set of replicas selected by labels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendGroupSpec {
    /// Every pair must be present on a replica for it to be selected.
    /// An empty selector selects nothing.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl BackendGroupSpec {
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.match_labels.is_empty()
            && self
                .match_labels
                .iter()
                .all(|(k, v)| labels.get(k) == Some(v))
    }
}
