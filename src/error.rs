//! Error types for the routing core.
//!
//! No error here is fatal to the process: not-found errors are request
//! scoped, configuration errors are scoped to one route's activation and
//! malformed events are scoped to one watch event.

use crate::model::{ObjectKey, ObjectKind};

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No route matches the request.
    #[error("no route matches host {host:?} path {path:?}")]
    RouteNotFound { host: String, path: String },

    /// A route matched but none of its replicas can take the request.
    #[error("no eligible backend for route {route}")]
    NoEligibleBackend { route: ObjectKey },

    /// A route's scheduler configuration could not be activated.
    #[error("invalid scheduler configuration for route {route}: {source}")]
    InvalidConfiguration {
        route: ObjectKey,
        #[source]
        source: PluginError,
    },

    /// A watch event could not be applied.
    #[error("malformed {kind} event for {key}: {reason}")]
    MalformedEvent {
        kind: ObjectKind,
        key: ObjectKey,
        reason: String,
    },

    /// Process-level configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RouterError {
    /// True for the errors a dispatcher turns into "no backend available".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RouteNotFound { .. } | Self::NoEligibleBackend { .. }
        )
    }

    pub(crate) fn malformed(kind: ObjectKind, key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            kind,
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while turning plugin configuration into plugin instances.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unknown scoring plugin {0:?}")]
    UnknownPlugin(String),

    #[error("invalid arguments for plugin {plugin:?}: {reason}")]
    InvalidArgs { plugin: String, reason: String },

    #[error("scheduler configuration lists no plugins")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let route = ObjectKey::new("default", "r1");
        assert!(RouterError::RouteNotFound {
            host: "a".into(),
            path: "/".into()
        }
        .is_not_found());
        assert!(RouterError::NoEligibleBackend {
            route: route.clone()
        }
        .is_not_found());
        assert!(!RouterError::InvalidConfiguration {
            route,
            source: PluginError::Empty
        }
        .is_not_found());
    }

    #[test]
    fn test_messages_identify_offending_key() {
        let err = RouterError::malformed(
            ObjectKind::Replica,
            &ObjectKey::new("serving", "pod-1"),
            "missing payload",
        );
        assert_eq!(
            err.to_string(),
            "malformed Replica event for serving/pod-1: missing payload"
        );

        let err = RouterError::InvalidConfiguration {
            route: ObjectKey::new("serving", "chat"),
            source: PluginError::UnknownPlugin("round-robin".into()),
        };
        assert!(err.to_string().contains("serving/chat"));
        assert!(err.to_string().contains("round-robin"));
    }
}
