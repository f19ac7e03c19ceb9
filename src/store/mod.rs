//! Object storage for the router.
//!
//! Provides thread-safe storage for replicas, routes, backend groups and
//! gateway-level objects received from the cluster watcher, and the route
//! index derived from them.

mod datastore;
mod event;
mod index;
mod objects;
mod snapshot;

pub use datastore::{Datastore, IngestReport, StoreStatsSnapshot};
pub use event::{parse_event_lines, ApplyOutcome, EventOp, WatchEvent};
pub use index::RouteIndex;
pub use objects::{BackendGroup, GatewayObject, Replica, Route, StoredObject};
pub use snapshot::{
    BackendGroupStatus, GatewayObjectStatus, ObjectStatus, ReplicaStatus, RouteStatus, Snapshot,
};
