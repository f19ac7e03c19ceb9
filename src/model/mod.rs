//! Routable object model.
//!
//! Identities and typed specs for the three object kinds the router
//! watches: replicas, routes and backend groups.

mod key;
mod spec;

pub use key::{ObjectKey, ObjectKind, DEFAULT_NAMESPACE};
pub use spec::{
    BackendGroupSpec, HeaderMatch, HeaderMatchType, PathMatch, PathMatchType, PluginConfig,
    ReplicaSpec, RouteSpec, SchedulerConfig,
};
