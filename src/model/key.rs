//! Object identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespace assumed when a key is given as a bare name.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Stable identity of a routable object.
///
/// Ordering is by `(namespace, name)`, which is the order used for every
/// deterministic tie-break in the router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns a key for `name` in the same namespace as `self`.
    pub fn sibling(&self, name: &str) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = String;

    /// Parses `namespace/name`, or a bare `name` in the default namespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, s),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(format!("invalid object key {s:?}, expected namespace/name"));
        }
        Ok(Self::new(namespace, name))
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind of routable object carried by a watch event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ObjectKind {
    Replica,
    Route,
    BackendGroup,
    /// Gateway-level objects. Stored and exposed for introspection; they
    /// take no part in route matching.
    Gateway,
    #[serde(rename = "HTTPRoute")]
    HttpRoute,
    InferencePool,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        Self::Replica,
        Self::Route,
        Self::BackendGroup,
        Self::Gateway,
        Self::HttpRoute,
        Self::InferencePool,
    ];

    /// True for kinds the store keeps as opaque documents.
    pub fn is_gateway_level(self) -> bool {
        matches!(self, Self::Gateway | Self::HttpRoute | Self::InferencePool)
    }

    /// Collection name used by the introspection endpoints.
    pub fn plural(self) -> &'static str {
        match self {
            Self::Replica => "replicas",
            Self::Route => "routes",
            Self::BackendGroup => "backendgroups",
            Self::Gateway => "gateways",
            Self::HttpRoute => "httproutes",
            Self::InferencePool => "inferencepools",
        }
    }

    /// Resolves a `/debug/config_dump/<kind>` path segment.
    ///
    /// Accepts the collection name plus the cluster resource names
    /// (`pods`, `modelroutes`, `modelservers`) operators are used to.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "replicas" | "pods" => Some(Self::Replica),
            "routes" | "modelroutes" => Some(Self::Route),
            "backendgroups" | "modelservers" => Some(Self::BackendGroup),
            "gateways" => Some(Self::Gateway),
            "httproutes" => Some(Self::HttpRoute),
            "inferencepools" => Some(Self::InferencePool),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Replica => "Replica",
            Self::Route => "Route",
            Self::BackendGroup => "BackendGroup",
            Self::Gateway => "Gateway",
            Self::HttpRoute => "HTTPRoute",
            Self::InferencePool => "InferencePool",
        };
        f.write_str(name)
    }
}
