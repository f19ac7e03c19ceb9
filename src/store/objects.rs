//! Stored object handles.
//!
//! Objects are immutable once stored; an update replaces the handle. A
//! replica's load counters and retirement flag are carried from one
//! version of the handle to the next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{BackendGroupSpec, ObjectKey, ObjectKind, ReplicaSpec, RouteSpec};
use crate::routing::LoadCounters;
use crate::scheduler::SchedulingPolicy;

/// One backend process.
#[derive(Debug)]
pub struct Replica {
    key: ObjectKey,
    spec: ReplicaSpec,
    load: Arc<LoadCounters>,
    retired: Arc<AtomicBool>,
}

impl Replica {
    pub fn new(key: ObjectKey, spec: ReplicaSpec) -> Self {
        Self {
            key,
            spec,
            load: Arc::new(LoadCounters::default()),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// New version of `previous` with a replaced spec and the same live state.
    pub(crate) fn succeed(previous: &Replica, spec: ReplicaSpec) -> Self {
        Self {
            key: previous.key.clone(),
            spec,
            load: Arc::clone(&previous.load),
            retired: Arc::clone(&previous.retired),
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn spec(&self) -> &ReplicaSpec {
        &self.spec
    }

    pub fn endpoint(&self) -> &str {
        &self.spec.endpoint
    }

    pub fn is_ready(&self) -> bool {
        self.spec.ready
    }

    pub fn load(&self) -> &LoadCounters {
        &self.load
    }

    /// True once the replica has been deleted from the store. Index
    /// snapshots taken before the delete may still hold the handle.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Ready and still present in the store.
    pub fn is_eligible(&self) -> bool {
        self.is_ready() && !self.is_retired()
    }
}

/// A match rule with its activated scheduling policy.
#[derive(Debug)]
pub struct Route {
    key: ObjectKey,
    spec: RouteSpec,
    policy: Arc<SchedulingPolicy>,
}

impl Route {
    pub fn new(key: ObjectKey, spec: RouteSpec, policy: Arc<SchedulingPolicy>) -> Self {
        Self { key, spec, policy }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn spec(&self) -> &RouteSpec {
        &self.spec
    }

    pub fn policy(&self) -> &Arc<SchedulingPolicy> {
        &self.policy
    }

    /// Keys of the backend groups this route sends traffic to.
    pub fn backend_group_keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.spec
            .backend_groups
            .iter()
            .map(|name| self.key.sibling(name))
    }
}

#[derive(Debug)]
pub struct BackendGroup {
    key: ObjectKey,
    spec: BackendGroupSpec,
}

impl BackendGroup {
    pub fn new(key: ObjectKey, spec: BackendGroupSpec) -> Self {
        Self { key, spec }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn spec(&self) -> &BackendGroupSpec {
        &self.spec
    }

    /// Whether `replica` belongs to this group's selector.
    pub fn selects(&self, replica: &Replica) -> bool {
        replica.key().namespace == self.key.namespace && self.spec.selects(&replica.spec().labels)
    }
}

/// Gateway, HTTPRoute or InferencePool document, kept as received.
#[derive(Debug, PartialEq)]
pub struct GatewayObject {
    kind: ObjectKind,
    key: ObjectKey,
    spec: serde_json::Value,
}

impl GatewayObject {
    pub fn new(kind: ObjectKind, key: ObjectKey, spec: serde_json::Value) -> Self {
        Self { kind, key, spec }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn spec(&self) -> &serde_json::Value {
        &self.spec
    }
}

/// Current stored version of one object.
#[derive(Debug, Clone)]
pub enum StoredObject {
    Replica(Arc<Replica>),
    Route(Arc<Route>),
    BackendGroup(Arc<BackendGroup>),
    Gateway(Arc<GatewayObject>),
}
