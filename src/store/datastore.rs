//! Concurrent object store fed by watch events.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use super::event::{ApplyOutcome, EventOp, WatchEvent};
use super::index::RouteIndex;
use super::objects::{BackendGroup, GatewayObject, Replica, Route, StoredObject};
use super::snapshot::{ObjectStatus, Snapshot};
use crate::error::{PluginError, Result, RouterError};
use crate::model::{BackendGroupSpec, ObjectKey, ObjectKind, PluginConfig, ReplicaSpec, RouteSpec};
use crate::scheduler::PluginRegistry;

/// Upper bound on events coalesced into one index publication by [`Datastore::run`].
const MAX_BATCH: usize = 256;

#[derive(Debug, Default)]
struct StoreStats {
    applied: AtomicU64,
    unchanged: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatsSnapshot {
    pub index_version: u64,
    pub replicas: usize,
    pub routes: usize,
    pub backend_groups: usize,
    pub gateway_objects: usize,
    pub applied: u64,
    pub unchanged: u64,
    pub rejected: u64,
}

/// Result of ingesting a batch of events.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub applied: usize,
    pub unchanged: usize,
    pub rejected: Vec<RouterError>,
}

/// Keys whose index entries are stale after map writes.
#[derive(Debug, Default)]
struct PendingChanges {
    replicas: BTreeSet<ObjectKey>,
    routes: BTreeSet<ObjectKey>,
    gateway_objects: BTreeSet<(ObjectKind, ObjectKey)>,
    regroup: bool,
}

impl PendingChanges {
    fn record(&mut self, kind: ObjectKind, key: ObjectKey) {
        match kind {
            ObjectKind::Replica => {
                self.replicas.insert(key);
            }
            ObjectKind::Route => {
                self.routes.insert(key);
            }
            ObjectKind::BackendGroup => self.regroup = true,
            ObjectKind::Gateway | ObjectKind::HttpRoute | ObjectKind::InferencePool => {
                self.gateway_objects.insert((kind, key));
            }
        }
    }

    fn is_empty(&self) -> bool {
        !self.regroup
            && self.replicas.is_empty()
            && self.routes.is_empty()
            && self.gateway_objects.is_empty()
    }
}

/// Thread-safe store of replicas, routes, backend groups and
/// gateway-level objects.
///
/// Each kind lives in its own `DashMap`, so writes to one key only
/// contend with operations on the same shard. After a write the affected
/// entries of the [`RouteIndex`] are patched into a new version and
/// published with `ArcSwap::rcu`; neither readers nor writers take a
/// store-wide lock.
pub struct Datastore {
    replicas: DashMap<ObjectKey, Arc<Replica>>,
    routes: DashMap<ObjectKey, Arc<Route>>,
    backend_groups: DashMap<ObjectKey, Arc<BackendGroup>>,
    gateway_objects: DashMap<(ObjectKind, ObjectKey), Arc<GatewayObject>>,
    index: ArcSwap<RouteIndex>,
    registry: Arc<PluginRegistry>,
    default_plugins: Vec<PluginConfig>,
    stats: StoreStats,
}

impl Datastore {
    /// Creates an empty store. `default_plugins` are activated for routes
    /// without their own scheduler configuration and are validated here.
    pub fn new(
        registry: Arc<PluginRegistry>,
        default_plugins: Vec<PluginConfig>,
    ) -> std::result::Result<Self, PluginError> {
        registry.activate(&default_plugins)?;
        Ok(Self::build(registry, default_plugins))
    }

    /// Creates a store with the built-in plugins and `least-request` as
    /// the default policy.
    pub fn with_defaults() -> Self {
        Self::build(
            Arc::new(PluginRegistry::with_builtin()),
            vec![PluginConfig::named(crate::scheduler::least_request::NAME)],
        )
    }

    fn build(registry: Arc<PluginRegistry>, default_plugins: Vec<PluginConfig>) -> Self {
        Self {
            replicas: DashMap::new(),
            routes: DashMap::new(),
            backend_groups: DashMap::new(),
            gateway_objects: DashMap::new(),
            index: ArcSwap::from_pointee(RouteIndex::default()),
            registry,
            default_plugins,
            stats: StoreStats::default(),
        }
    }

    /// Applies one watch event.
    ///
    /// Add and Update are both upserts; re-delivery of an identical object
    /// and Delete of an absent key are [`ApplyOutcome::Unchanged`]. A
    /// rejected event leaves the store as it was.
    pub fn apply(&self, event: WatchEvent) -> Result<ApplyOutcome> {
        let mut pending = PendingChanges::default();
        let result = self.write(event, &mut pending);
        self.publish(&pending);
        result
    }

    /// Applies events in order, continuing past rejected ones. The index
    /// is published once for the whole batch.
    pub fn apply_all<I>(&self, events: I) -> IngestReport
    where
        I: IntoIterator<Item = WatchEvent>,
    {
        let mut pending = PendingChanges::default();
        let mut report = IngestReport::default();
        for event in events {
            match self.write(event, &mut pending) {
                Ok(ApplyOutcome::Unchanged) => report.unchanged += 1,
                Ok(_) => report.applied += 1,
                Err(e) => report.rejected.push(e),
            }
        }
        self.publish(&pending);
        report
    }

    /// Drains the watcher's event stream until the sender is dropped.
    ///
    /// Events already queued when one arrives are applied with it and
    /// published together.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<WatchEvent>) {
        tracing::info!("watch event ingestion started");
        while let Some(event) = events.recv().await {
            let mut pending = PendingChanges::default();
            // Errors are logged by write; ingestion continues.
            let _ = self.write(event, &mut pending);
            for _ in 1..MAX_BATCH {
                match events.try_recv() {
                    Ok(event) => {
                        let _ = self.write(event, &mut pending);
                    }
                    Err(_) => break,
                }
            }
            self.publish(&pending);
        }
        tracing::info!("watch event stream closed");
    }

    /// Current stored version of one object.
    pub fn get(&self, kind: ObjectKind, key: &ObjectKey) -> Option<StoredObject> {
        match kind {
            ObjectKind::Replica => self
                .replicas
                .get(key)
                .map(|e| StoredObject::Replica(Arc::clone(e.value()))),
            ObjectKind::Route => self
                .routes
                .get(key)
                .map(|e| StoredObject::Route(Arc::clone(e.value()))),
            ObjectKind::BackendGroup => self
                .backend_groups
                .get(key)
                .map(|e| StoredObject::BackendGroup(Arc::clone(e.value()))),
            ObjectKind::Gateway | ObjectKind::HttpRoute | ObjectKind::InferencePool => self
                .gateway_objects
                .get(&(kind, key.clone()))
                .map(|e| StoredObject::Gateway(Arc::clone(e.value()))),
        }
    }

    /// Current route index. Hold on to it for the duration of one decision.
    pub fn index(&self) -> Arc<RouteIndex> {
        self.index.load_full()
    }

    /// Point-in-time copy of all objects of `kind`.
    pub fn snapshot(&self, kind: ObjectKind) -> Snapshot {
        self.index.load().snapshot(kind)
    }

    /// Point-in-time view of one object.
    pub fn status(&self, kind: ObjectKind, key: &ObjectKey) -> Option<ObjectStatus> {
        self.index.load().status(kind, key)
    }

    pub fn match_route(&self, host: &str, path: &str, headers: &[(&str, &str)]) -> Option<Arc<Route>> {
        self.index.load().match_route(host, path, headers)
    }

    pub fn candidate_replicas(&self, route: &Route) -> Vec<Arc<Replica>> {
        self.index.load().candidate_replicas(route)
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            index_version: self.index.load().version(),
            replicas: self.replicas.len(),
            routes: self.routes.len(),
            backend_groups: self.backend_groups.len(),
            gateway_objects: self.gateway_objects.len(),
            applied: self.stats.applied.load(Ordering::Relaxed),
            unchanged: self.stats.unchanged.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }

    /// Applies one event to the maps and records what the index must pick up.
    fn write(&self, event: WatchEvent, pending: &mut PendingChanges) -> Result<ApplyOutcome> {
        let kind = event.kind;
        let key = event.key.clone();
        let op = event.op;

        let result = match kind {
            ObjectKind::Replica => self.apply_replica(event),
            ObjectKind::Route => self.apply_route(event),
            ObjectKind::BackendGroup => self.apply_backend_group(event),
            ObjectKind::Gateway | ObjectKind::HttpRoute | ObjectKind::InferencePool => {
                self.apply_gateway_object(event)
            }
        };

        match &result {
            Ok(ApplyOutcome::Unchanged) => {
                self.stats.unchanged.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%kind, %key, ?op, "event changed nothing");
            }
            Ok(outcome) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%kind, %key, ?op, ?outcome, "event applied");
                pending.record(kind, key);
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%kind, %key, ?op, error = %e, "event rejected");
            }
        }
        result
    }

    fn apply_replica(&self, mut event: WatchEvent) -> Result<ApplyOutcome> {
        if event.op == EventOp::Delete {
            return Ok(match self.replicas.remove(&event.key) {
                Some((_, replica)) => {
                    replica.retire();
                    ApplyOutcome::Deleted
                }
                None => ApplyOutcome::Unchanged,
            });
        }

        let spec: ReplicaSpec = event.decode()?;
        spec.validate()
            .map_err(|reason| RouterError::malformed(event.kind, &event.key, reason))?;

        Ok(match self.replicas.entry(event.key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().spec() == &spec {
                    ApplyOutcome::Unchanged
                } else {
                    let next = Replica::succeed(entry.get(), spec);
                    entry.insert(Arc::new(next));
                    ApplyOutcome::Updated
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Replica::new(event.key, spec)));
                ApplyOutcome::Created
            }
        })
    }

    fn apply_route(&self, mut event: WatchEvent) -> Result<ApplyOutcome> {
        if event.op == EventOp::Delete {
            return Ok(match self.routes.remove(&event.key) {
                Some(_) => ApplyOutcome::Deleted,
                None => ApplyOutcome::Unchanged,
            });
        }

        let spec: RouteSpec = event.decode()?;
        spec.validate()
            .map_err(|reason| RouterError::malformed(event.kind, &event.key, reason))?;

        let outcome = match self.routes.entry(event.key.clone()) {
            Entry::Occupied(entry) if entry.get().spec() == &spec => ApplyOutcome::Unchanged,
            Entry::Occupied(mut entry) => {
                let route = self.activate(event.key, spec)?;
                entry.insert(Arc::new(route));
                ApplyOutcome::Updated
            }
            Entry::Vacant(entry) => {
                let route = self.activate(event.key, spec)?;
                entry.insert(Arc::new(route));
                ApplyOutcome::Created
            }
        };
        Ok(outcome)
    }

    /// Instantiates the route's scheduling policy. A failure rejects this
    /// route version only; any previous version stays active.
    fn activate(&self, key: ObjectKey, spec: RouteSpec) -> Result<Route> {
        let configs = spec
            .scheduler
            .as_ref()
            .map(|s| s.plugins.as_slice())
            .unwrap_or(&self.default_plugins);
        match self.registry.activate(configs) {
            Ok(policy) => Ok(Route::new(key, spec, Arc::new(policy))),
            Err(source) => Err(RouterError::InvalidConfiguration { route: key, source }),
        }
    }

    fn apply_backend_group(&self, mut event: WatchEvent) -> Result<ApplyOutcome> {
        if event.op == EventOp::Delete {
            let Some((_, group)) = self.backend_groups.remove(&event.key) else {
                return Ok(ApplyOutcome::Unchanged);
            };
            // Replicas go away with their group. Members are read from the
            // map, so writes not yet published to the index are included.
            for key in self.members_of(&group) {
                if let Some((_, replica)) = self.replicas.remove(&key) {
                    replica.retire();
                    tracing::debug!(replica = %key, group = %event.key, "replica removed with its backend group");
                }
            }
            return Ok(ApplyOutcome::Deleted);
        }

        let spec: BackendGroupSpec = event.decode()?;

        Ok(match self.backend_groups.entry(event.key.clone()) {
            Entry::Occupied(entry) if entry.get().spec() == &spec => ApplyOutcome::Unchanged,
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::new(BackendGroup::new(event.key, spec)));
                ApplyOutcome::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(BackendGroup::new(event.key, spec)));
                ApplyOutcome::Created
            }
        })
    }

    /// Replicas `group` selects that no smaller remaining group claims.
    fn members_of(&self, group: &BackendGroup) -> Vec<ObjectKey> {
        let claimers: Vec<Arc<BackendGroup>> = self
            .backend_groups
            .iter()
            .filter(|g| g.key() < group.key())
            .map(|g| Arc::clone(g.value()))
            .collect();
        self.replicas
            .iter()
            .filter(|r| group.selects(r.value()))
            .filter(|r| !claimers.iter().any(|g| g.selects(r.value())))
            .map(|r| r.key().clone())
            .collect()
    }

    fn apply_gateway_object(&self, mut event: WatchEvent) -> Result<ApplyOutcome> {
        let slot = (event.kind, event.key.clone());
        if event.op == EventOp::Delete {
            return Ok(match self.gateway_objects.remove(&slot) {
                Some(_) => ApplyOutcome::Deleted,
                None => ApplyOutcome::Unchanged,
            });
        }

        let spec: serde_json::Value = event.decode()?;
        if !spec.is_object() {
            return Err(RouterError::malformed(event.kind, &event.key, "payload must be a JSON object"));
        }

        Ok(match self.gateway_objects.entry(slot) {
            Entry::Occupied(entry) if entry.get().spec() == &spec => ApplyOutcome::Unchanged,
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::new(GatewayObject::new(event.kind, event.key, spec)));
                ApplyOutcome::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(GatewayObject::new(event.kind, event.key, spec)));
                ApplyOutcome::Created
            }
        })
    }

    /// Publishes an index reflecting the maps for every pending key.
    ///
    /// Each patch reads the key's current map entry, so a retried or
    /// reordered publication still converges on the latest write.
    fn publish(&self, pending: &PendingChanges) {
        if pending.is_empty() {
            return;
        }
        let previous = self.index.rcu(|current| {
            let mut next = current.successor();
            if pending.regroup {
                next.regroup(collect(&self.replicas), collect(&self.backend_groups));
            } else {
                for key in &pending.replicas {
                    next.put_replica(key, self.replicas.get(key).map(|e| Arc::clone(e.value())));
                }
            }
            for key in &pending.routes {
                next.put_route(key, self.routes.get(key).map(|e| Arc::clone(e.value())));
            }
            for slot in &pending.gateway_objects {
                let object = self.gateway_objects.get(slot).map(|e| Arc::clone(e.value()));
                next.put_gateway_object(slot.0, &slot.1, object);
            }
            Arc::new(next)
        });
        tracing::trace!(
            version = previous.version() + 1,
            replicas = pending.replicas.len(),
            routes = pending.routes.len(),
            regroup = pending.regroup,
            "route index published"
        );
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn collect<T>(map: &DashMap<ObjectKey, Arc<T>>) -> Vec<Arc<T>> {
    map.iter().map(|entry| Arc::clone(entry.value())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::thread;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    fn replica_event(name: &str, model: &str, ready: bool) -> WatchEvent {
        WatchEvent::add(
            ObjectKind::Replica,
            key(name),
            json!({
                "endpoint": format!("{name}:8000"),
                "labels": {"model": model},
                "ready": ready
            }),
        )
    }

    fn group_event(name: &str, model: &str) -> WatchEvent {
        WatchEvent::add(
            ObjectKind::BackendGroup,
            key(name),
            json!({"matchLabels": {"model": model}}),
        )
    }

    fn route_event(name: &str, path: &str, groups: Vec<&str>) -> WatchEvent {
        WatchEvent::add(
            ObjectKind::Route,
            key(name),
            json!({"path": {"value": path}, "backendGroups": groups}),
        )
    }

    fn route_event_with(name: &str, payload: Value) -> WatchEvent {
        WatchEvent::add(ObjectKind::Route, key(name), payload)
    }

    // ========== Phase 1: Basics ==========

    #[test]
    fn test_new_store_empty() {
        let store = Datastore::with_defaults();
        let stats = store.stats();
        assert_eq!(stats.index_version, 0);
        assert_eq!((stats.replicas, stats.routes, stats.backend_groups), (0, 0, 0));
        for kind in ObjectKind::ALL {
            assert!(store.snapshot(kind).is_empty());
        }
    }

    #[test]
    fn test_new_rejects_invalid_default_plugins() {
        let registry = Arc::new(PluginRegistry::with_builtin());
        assert!(Datastore::new(Arc::clone(&registry), vec![]).is_err());
        assert!(Datastore::new(registry, vec![PluginConfig::named("nope")]).is_err());
    }

    #[test]
    fn test_add_then_get() {
        let store = Datastore::with_defaults();
        let outcome = store.apply(replica_event("pod-0", "llama", true)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);

        match store.get(ObjectKind::Replica, &key("pod-0")) {
            Some(StoredObject::Replica(replica)) => assert_eq!(replica.endpoint(), "pod-0:8000"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.get(ObjectKind::Route, &key("pod-0")).is_none());
        assert_eq!(store.stats().index_version, 1);
    }

    #[test]
    fn test_duplicate_add_is_idempotent() {
        let store = Datastore::with_defaults();
        store.apply(replica_event("pod-0", "llama", true)).unwrap();
        let outcome = store.apply(replica_event("pod-0", "llama", true)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(store.stats().index_version, 1);
        assert_eq!(store.snapshot(ObjectKind::Replica).len(), 1);
    }

    #[test]
    fn test_update_for_absent_key_creates() {
        let store = Datastore::with_defaults();
        let mut event = replica_event("pod-0", "llama", true);
        event.op = EventOp::Update;
        assert_eq!(store.apply(event).unwrap(), ApplyOutcome::Created);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let store = Datastore::with_defaults();
        for kind in ObjectKind::ALL {
            let outcome = store.apply(WatchEvent::delete(kind, key("ghost"))).unwrap();
            assert_eq!(outcome, ApplyOutcome::Unchanged);
        }
        assert_eq!(store.stats().rejected, 0);
    }

    #[test]
    fn test_delete_then_snapshot_excludes_key() {
        let store = Datastore::with_defaults();
        store.apply(replica_event("pod-0", "llama", true)).unwrap();
        store.apply(replica_event("pod-1", "llama", true)).unwrap();
        store.apply(route_event("chat", "/v1", vec!["llama"])).unwrap();

        store.apply(group_event("llama", "llama")).unwrap();
        store.apply(group_event("qwen", "qwen")).unwrap();

        store.apply(WatchEvent::delete(ObjectKind::Replica, key("pod-0"))).unwrap();
        store.apply(WatchEvent::delete(ObjectKind::Route, key("chat"))).unwrap();
        store.apply(WatchEvent::delete(ObjectKind::BackendGroup, key("qwen"))).unwrap();

        assert_eq!(store.snapshot(ObjectKind::Replica).keys(), vec![key("pod-1")]);
        assert!(store.snapshot(ObjectKind::Route).is_empty());
        assert_eq!(store.snapshot(ObjectKind::BackendGroup).keys(), vec![key("llama")]);
        assert!(store.status(ObjectKind::BackendGroup, &key("qwen")).is_none());
    }

    // ========== Phase 2: Malformed Events ==========

    #[test]
    fn test_malformed_event_identifies_key_and_keeps_state() {
        let store = Datastore::with_defaults();
        store.apply(replica_event("pod-0", "llama", true)).unwrap();

        let bad = WatchEvent::update(
            ObjectKind::Replica,
            key("pod-0"),
            json!({"endpoint": "no-port"}),
        );
        let err = store.apply(bad).unwrap_err();
        assert!(matches!(&err, RouterError::MalformedEvent { key: k, .. } if k.name == "pod-0"));

        match store.get(ObjectKind::Replica, &key("pod-0")) {
            Some(StoredObject::Replica(replica)) => assert_eq!(replica.endpoint(), "pod-0:8000"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.stats().rejected, 1);
    }

    #[test]
    fn test_apply_all_isolates_bad_events() {
        let store = Datastore::with_defaults();
        let report = store.apply_all(vec![
            replica_event("pod-0", "llama", true),
            WatchEvent::add(ObjectKind::Replica, key("bad"), json!({"ready": true})),
            WatchEvent {
                kind: ObjectKind::Route,
                op: EventOp::Add,
                key: key("no-payload"),
                payload: None,
            },
            group_event("llama", "llama"),
            replica_event("pod-0", "llama", true),
        ]);

        assert_eq!(report.applied, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(store.snapshot(ObjectKind::Replica).len(), 1);
        assert_eq!(store.snapshot(ObjectKind::BackendGroup).len(), 1);
    }

    // ========== Phase 3: Route Activation ==========

    #[test]
    fn test_route_uses_default_plugins() {
        let store = Datastore::with_defaults();
        store.apply(route_event("chat", "/v1", vec![])).unwrap();
        match store.get(ObjectKind::Route, &key("chat")) {
            Some(StoredObject::Route(route)) => {
                assert_eq!(route.policy().plugin_names(), vec!["least-request"])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_scheduler_config_rejects_only_that_route() {
        let store = Datastore::with_defaults();
        store.apply(route_event("chat", "/v1", vec![])).unwrap();

        let err = store
            .apply(route_event_with(
                "broken",
                json!({"scheduler": {"plugins": [{"name": "least-request", "args": {"bogus": 1}}]}}),
            ))
            .unwrap_err();
        assert!(matches!(&err, RouterError::InvalidConfiguration { route, .. } if route.name == "broken"));

        assert!(store.get(ObjectKind::Route, &key("broken")).is_none());
        assert!(store.get(ObjectKind::Route, &key("chat")).is_some());
    }

    #[test]
    fn test_invalid_update_keeps_previous_route_version() {
        let store = Datastore::with_defaults();
        store.apply(route_event("chat", "/v1", vec![])).unwrap();
        let err = store.apply(route_event_with(
            "chat",
            json!({"path": {"value": "/v2"}, "scheduler": {"plugins": [{"name": "unknown"}]}}),
        ));
        assert!(err.is_err());

        let route = store.match_route("any", "/v1/x", &[]).unwrap();
        assert_eq!(route.key(), &key("chat"));
        assert!(store.match_route("any", "/v2", &[]).is_none());
    }

    #[test]
    fn test_route_update_swaps_policy() {
        let store = Datastore::with_defaults();
        store.apply(route_event("chat", "/v1", vec![])).unwrap();
        store
            .apply(route_event_with(
                "chat",
                json!({
                    "path": {"value": "/v1"},
                    "scheduler": {"plugins": [{"name": "least-request", "args": {"maxWaitingRequests": 4}}]}
                }),
            ))
            .unwrap();
        let route = store.match_route("any", "/v1", &[]).unwrap();
        assert_eq!(
            route.spec().scheduler.as_ref().map(|s| s.plugins.len()),
            Some(1)
        );
    }

    // ========== Phase 4: Replicas & Groups ==========

    #[test]
    fn test_update_keeps_load_counters() {
        let store = Datastore::with_defaults();
        store.apply(replica_event("pod-0", "llama", true)).unwrap();
        let before = match store.get(ObjectKind::Replica, &key("pod-0")) {
            Some(StoredObject::Replica(r)) => r,
            other => panic!("unexpected {other:?}"),
        };
        crate::routing::LoadTracker::new().on_request_start(&before, false);

        store.apply(replica_event("pod-0", "llama", false)).unwrap();
        let after = match store.get(ObjectKind::Replica, &key("pod-0")) {
            Some(StoredObject::Replica(r)) => r,
            other => panic!("unexpected {other:?}"),
        };
        assert!(!after.is_ready());
        assert_eq!(after.load().running(), 1);
    }

    #[test]
    fn test_candidates_follow_readiness() {
        let store = Datastore::with_defaults();
        store.apply(group_event("llama", "llama")).unwrap();
        store.apply(replica_event("pod-0", "llama", true)).unwrap();
        store.apply(replica_event("pod-1", "llama", false)).unwrap();
        store.apply(route_event("chat", "/v1", vec!["llama"])).unwrap();

        let route = store.match_route("any", "/v1", &[]).unwrap();
        assert_eq!(store.candidate_replicas(&route).len(), 1);

        store.apply(replica_event("pod-1", "llama", true)).unwrap();
        assert_eq!(store.candidate_replicas(&route).len(), 2);
    }

    #[test]
    fn test_group_delete_removes_member_replicas() {
        let store = Datastore::with_defaults();
        store.apply(group_event("llama", "llama")).unwrap();
        store.apply(group_event("qwen", "qwen")).unwrap();
        store.apply(replica_event("llama-0", "llama", true)).unwrap();
        store.apply(replica_event("qwen-0", "qwen", true)).unwrap();
        let stale_index = store.index();

        store
            .apply(WatchEvent::delete(ObjectKind::BackendGroup, key("llama")))
            .unwrap();

        assert_eq!(store.snapshot(ObjectKind::Replica).keys(), vec![key("qwen-0")]);
        // Readers holding an older index no longer see the replica as eligible.
        let member = &stale_index.group_members(&key("llama"))[0];
        assert!(!member.is_eligible());
    }

    #[test]
    fn test_group_delete_includes_unpublished_replicas() {
        let store = Datastore::with_defaults();
        store.apply(group_event("llama", "llama")).unwrap();

        // Written to the map, not yet visible in the index.
        let mut pending = PendingChanges::default();
        store.write(replica_event("llama-0", "llama", true), &mut pending).unwrap();
        assert!(store.index().replica(&key("llama-0")).is_none());

        store
            .apply(WatchEvent::delete(ObjectKind::BackendGroup, key("llama")))
            .unwrap();
        store.publish(&pending);

        assert!(store.get(ObjectKind::Replica, &key("llama-0")).is_none());
        assert!(store.snapshot(ObjectKind::Replica).is_empty());
    }

    #[test]
    fn test_group_delete_keeps_replicas_claimed_by_smaller_group() {
        let store = Datastore::with_defaults();
        store.apply(group_event("alpha", "llama")).unwrap();
        store.apply(group_event("zeta", "llama")).unwrap();
        store.apply(replica_event("llama-0", "llama", true)).unwrap();

        store
            .apply(WatchEvent::delete(ObjectKind::BackendGroup, key("zeta")))
            .unwrap();

        assert_eq!(store.snapshot(ObjectKind::Replica).keys(), vec![key("llama-0")]);
        assert_eq!(
            store.index().backend_group_of(&key("llama-0")),
            Some(&key("alpha"))
        );
    }

    #[test]
    fn test_group_added_after_replicas_picks_them_up() {
        let store = Datastore::with_defaults();
        store.apply(replica_event("llama-0", "llama", true)).unwrap();
        assert_eq!(store.index().backend_group_of(&key("llama-0")), None);

        store.apply(group_event("llama", "llama")).unwrap();
        assert_eq!(store.index().group_members(&key("llama")).len(), 1);
    }

    #[test]
    fn test_snapshot_reports_membership_and_load() {
        let store = Datastore::with_defaults();
        store.apply(group_event("llama", "llama")).unwrap();
        store.apply(replica_event("pod-0", "llama", true)).unwrap();

        let snapshot = serde_json::to_value(store.snapshot(ObjectKind::Replica)).unwrap();
        assert_eq!(snapshot[0]["key"], "default/pod-0");
        assert_eq!(snapshot[0]["backendGroup"], "default/llama");
        assert_eq!(snapshot[0]["running"], 0);

        let groups = serde_json::to_value(store.snapshot(ObjectKind::BackendGroup)).unwrap();
        assert_eq!(groups[0]["readyReplicas"], 1);
    }

    #[test]
    fn test_status_single_object() {
        let store = Datastore::with_defaults();
        store.apply(route_event("chat", "/v1", vec!["llama"])).unwrap();
        let status = store.status(ObjectKind::Route, &key("chat")).unwrap();
        let value = serde_json::to_value(status).unwrap();
        assert_eq!(value["activePlugins"], json!(["least-request"]));
        assert_eq!(value["backendGroups"], json!(["llama"]));
        assert!(store.status(ObjectKind::Route, &key("other")).is_none());
    }

    // ========== Phase 5: Concurrency ==========

    #[test]
    fn test_out_of_order_keys_do_not_interfere() {
        let store = Datastore::with_defaults();
        store.apply(replica_event("a", "llama", true)).unwrap();
        store.apply(replica_event("b", "llama", true)).unwrap();
        // b's delete arrives between a's updates
        store.apply(replica_event("a", "qwen", true)).unwrap();
        store.apply(WatchEvent::delete(ObjectKind::Replica, key("b"))).unwrap();
        store.apply(replica_event("a", "qwen", false)).unwrap();

        match store.get(ObjectKind::Replica, &key("a")) {
            Some(StoredObject::Replica(r)) => {
                assert!(!r.is_ready());
                assert_eq!(r.spec().labels["model"], "qwen");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.get(ObjectKind::Replica, &key("b")).is_none());
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(Datastore::with_defaults());
        store.apply(group_event("llama", "llama")).unwrap();
        store.apply(route_event("chat", "/v1", vec!["llama"])).unwrap();
        let mut handles = vec![];

        // Writers on disjoint keys
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for round in 0..20 {
                    let name = format!("pod-{i}");
                    store.apply(replica_event(&name, "llama", round % 2 == 0)).unwrap();
                }
                store.apply(replica_event(&format!("pod-{i}"), "llama", true)).unwrap();
            }));
        }

        // Readers on the hot path
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let index = store.index();
                    if let Some(route) = index.match_route("any", "/v1", &[]) {
                        for replica in index.candidate_replicas(&route) {
                            assert!(replica.is_ready());
                        }
                    }
                    let _ = store.snapshot(ObjectKind::Replica);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // The last publication saw every write.
        let route = store.match_route("any", "/v1", &[]).unwrap();
        assert_eq!(store.candidate_replicas(&route).len(), 8);
        assert_eq!(store.snapshot(ObjectKind::Replica).len(), 8);
    }

    #[tokio::test]
    async fn test_run_drains_channel_past_errors() {
        let store = Arc::new(Datastore::with_defaults());
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(Arc::clone(&store).run(rx));

        tx.send(replica_event("pod-0", "llama", true)).await.unwrap();
        tx.send(WatchEvent::add(ObjectKind::Replica, key("bad"), json!(null)))
            .await
            .unwrap();
        tx.send(replica_event("pod-1", "llama", true)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.snapshot(ObjectKind::Replica).len(), 2);
        assert_eq!(store.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_run_coalesces_queued_events() {
        let store = Arc::new(Datastore::with_defaults());
        let (tx, rx) = mpsc::channel(64);
        for i in 0..10 {
            tx.send(replica_event(&format!("pod-{i}"), "llama", true)).await.unwrap();
        }
        drop(tx);

        Arc::clone(&store).run(rx).await;

        assert_eq!(store.snapshot(ObjectKind::Replica).len(), 10);
        assert_eq!(store.stats().index_version, 1);
    }

    // ========== Phase 6: Batched Publication ==========

    #[test]
    fn test_apply_all_publishes_once_per_batch() {
        let store = Datastore::with_defaults();
        let mut events = vec![group_event("llama", "llama"), route_event("chat", "/v1", vec!["llama"])];
        events.extend((0..50).map(|i| replica_event(&format!("pod-{i}"), "llama", true)));

        let report = store.apply_all(events);
        assert_eq!(report.applied, 52);
        assert_eq!(store.stats().index_version, 1);

        let route = store.match_route("any", "/v1", &[]).unwrap();
        assert_eq!(store.candidate_replicas(&route).len(), 50);

        // A batch that changes nothing publishes nothing.
        store.apply_all(vec![replica_event("pod-0", "llama", true)]);
        assert_eq!(store.stats().index_version, 1);
    }

    #[test]
    fn test_replica_event_leaves_routes_shared() {
        let store = Datastore::with_defaults();
        store.apply(group_event("llama", "llama")).unwrap();
        store.apply(route_event("chat", "/v1", vec!["llama"])).unwrap();
        let before = store.index();

        store.apply(replica_event("pod-0", "llama", true)).unwrap();
        let after = store.index();

        assert_eq!(after.version(), before.version() + 1);
        assert!(Arc::ptr_eq(&before.routes()[0], &after.routes()[0]));
        assert!(std::ptr::eq(before.routes().as_ptr(), after.routes().as_ptr()));
    }

    #[test]
    fn test_concurrent_group_and_replica_writes_converge() {
        let store = Arc::new(Datastore::with_defaults());
        store.apply(group_event("llama", "llama")).unwrap();

        let replicas = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..50 {
                    store.apply(replica_event(&format!("pod-{i}"), "llama", true)).unwrap();
                }
            })
        };
        let groups = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..20 {
                    let labels = if round % 2 == 0 {
                        json!({"model": "llama", "tier": "gold"})
                    } else {
                        json!({"model": "llama"})
                    };
                    store
                        .apply(WatchEvent::update(
                            ObjectKind::BackendGroup,
                            key("llama"),
                            json!({"matchLabels": labels}),
                        ))
                        .unwrap();
                }
            })
        };
        replicas.join().unwrap();
        groups.join().unwrap();

        assert_eq!(store.index().group_members(&key("llama")).len(), 50);
    }

    // ========== Phase 7: Gateway-Level Objects ==========

    #[test]
    fn test_gateway_objects_stored_and_listed() {
        let store = Datastore::with_defaults();
        let spec = json!({"gatewayClassName": "model-router", "listeners": [{"port": 80}]});
        let outcome = store
            .apply(WatchEvent::add(ObjectKind::Gateway, key("edge"), spec.clone()))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);
        store
            .apply(WatchEvent::add(ObjectKind::HttpRoute, key("edge"), json!({"rules": []})))
            .unwrap();

        match store.get(ObjectKind::Gateway, &key("edge")) {
            Some(StoredObject::Gateway(object)) => assert_eq!(object.spec(), &spec),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.snapshot(ObjectKind::Gateway).keys(), vec![key("edge")]);
        assert_eq!(store.snapshot(ObjectKind::HttpRoute).len(), 1);
        assert!(store.snapshot(ObjectKind::InferencePool).is_empty());
        assert_eq!(store.stats().gateway_objects, 2);

        let again = store
            .apply(WatchEvent::update(ObjectKind::Gateway, key("edge"), spec))
            .unwrap();
        assert_eq!(again, ApplyOutcome::Unchanged);

        store.apply(WatchEvent::delete(ObjectKind::Gateway, key("edge"))).unwrap();
        assert!(store.snapshot(ObjectKind::Gateway).is_empty());
        assert_eq!(store.snapshot(ObjectKind::HttpRoute).len(), 1);
    }

    #[test]
    fn test_gateway_object_must_be_json_object() {
        let store = Datastore::with_defaults();
        let err = store
            .apply(WatchEvent::add(ObjectKind::InferencePool, key("pool"), json!([1, 2])))
            .unwrap_err();
        assert!(matches!(err, RouterError::MalformedEvent { kind: ObjectKind::InferencePool, .. }));
        assert!(store.get(ObjectKind::InferencePool, &key("pool")).is_none());
    }

    #[test]
    fn test_gateway_objects_do_not_affect_routing() {
        let store = Datastore::with_defaults();
        store
            .apply(WatchEvent::add(ObjectKind::HttpRoute, key("chat"), json!({"hostnames": ["a"]})))
            .unwrap();
        assert!(store.match_route("a", "/", &[]).is_none());
    }

    #[test]
    fn test_default_impl() {
        let store = Datastore::default();
        assert_eq!(store.stats().index_version, 0);
        assert!(store.registry().contains("least-request"));
    }
}
