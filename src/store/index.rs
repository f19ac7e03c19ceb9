//! Read-optimized route index.
//!
//! An index is an immutable snapshot of the store, published atomically.
//! Readers load the current index once per request, so a decision never
//! observes a half-applied update.
//!
//! Every collection sits behind its own `Arc`. A new version starts as a
//! shallow clone of the previous one and copies only what a change
//! touches: a replica event rewrites one group's member list, a route
//! event rewrites the route list.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::objects::{BackendGroup, GatewayObject, Replica, Route};
use crate::model::{ObjectKey, ObjectKind};
use crate::routing::matcher::{match_specificity, Specificity};

#[derive(Debug, Default, Clone)]
pub struct RouteIndex {
    version: u64,
    routes: Arc<Vec<Arc<Route>>>,
    groups: Arc<Vec<Arc<BackendGroup>>>,
    // Group key to its replicas, sorted by key.
    members: Arc<HashMap<ObjectKey, Arc<Vec<Arc<Replica>>>>>,
    // Replicas no group selects, sorted by key.
    unassigned: Arc<Vec<Arc<Replica>>>,
    // Sorted by (kind, key).
    gateway_objects: Arc<Vec<Arc<GatewayObject>>>,
}

impl RouteIndex {
    /// Builds an index from the current objects. Inputs may be in any
    /// order; every list in the index is sorted by key.
    pub fn build(
        version: u64,
        replicas: Vec<Arc<Replica>>,
        mut routes: Vec<Arc<Route>>,
        groups: Vec<Arc<BackendGroup>>,
    ) -> Self {
        routes.sort_by(|a, b| a.key().cmp(b.key()));
        let mut index = Self {
            version,
            routes: Arc::new(routes),
            ..Self::default()
        };
        index.regroup(replicas, groups);
        index
    }

    /// Shallow copy with the next version number.
    pub(crate) fn successor(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next
    }

    /// Replaces the groups and recomputes every membership.
    pub(crate) fn regroup(
        &mut self,
        mut replicas: Vec<Arc<Replica>>,
        mut groups: Vec<Arc<BackendGroup>>,
    ) {
        replicas.sort_by(|a, b| a.key().cmp(b.key()));
        groups.sort_by(|a, b| a.key().cmp(b.key()));

        let mut members: HashMap<ObjectKey, Vec<Arc<Replica>>> = groups
            .iter()
            .map(|g| (g.key().clone(), Vec::new()))
            .collect();
        let mut unassigned = Vec::new();
        for replica in replicas {
            // A replica joins at most one group: the smallest selecting key.
            match groups.iter().find(|g| g.selects(&replica)) {
                Some(group) => members.entry(group.key().clone()).or_default().push(replica),
                None => unassigned.push(replica),
            }
        }

        self.groups = Arc::new(groups);
        self.members = Arc::new(
            members
                .into_iter()
                .map(|(group, list)| (group, Arc::new(list)))
                .collect(),
        );
        self.unassigned = Arc::new(unassigned);
    }

    /// Sets or clears one route.
    pub(crate) fn put_route(&mut self, key: &ObjectKey, route: Option<Arc<Route>>) {
        if route.is_none() && !contains(&self.routes, key, Route::key) {
            return;
        }
        upsert_sorted(Arc::make_mut(&mut self.routes), key, route, Route::key);
    }

    /// Sets or clears one replica, moving it to the group that now
    /// selects it.
    pub(crate) fn put_replica(&mut self, key: &ObjectKey, replica: Option<Arc<Replica>>) {
        match self.backend_group_of(key).cloned() {
            Some(group) => self.edit_members(&group, key, None),
            None if contains(&self.unassigned, key, Replica::key) => {
                upsert_sorted(Arc::make_mut(&mut self.unassigned), key, None, Replica::key);
            }
            None => {}
        }

        let Some(replica) = replica else {
            return;
        };
        let target = self
            .groups
            .iter()
            .find(|g| g.selects(&replica))
            .map(|g| g.key().clone());
        match target {
            Some(group) => self.edit_members(&group, key, Some(replica)),
            None => upsert_sorted(Arc::make_mut(&mut self.unassigned), key, Some(replica), Replica::key),
        }
    }

    fn edit_members(&mut self, group: &ObjectKey, key: &ObjectKey, replica: Option<Arc<Replica>>) {
        let list = Arc::make_mut(&mut self.members)
            .entry(group.clone())
            .or_default();
        upsert_sorted(Arc::make_mut(list), key, replica, Replica::key);
    }

    /// Sets or clears one gateway-level object.
    pub(crate) fn put_gateway_object(
        &mut self,
        kind: ObjectKind,
        key: &ObjectKey,
        object: Option<Arc<GatewayObject>>,
    ) {
        let position = self
            .gateway_objects
            .binary_search_by(|o| (o.kind(), o.key()).cmp(&(kind, key)));
        if position.is_err() && object.is_none() {
            return;
        }
        let list = Arc::make_mut(&mut self.gateway_objects);
        match (position, object) {
            (Ok(i), Some(object)) => list[i] = object,
            (Ok(i), None) => {
                list.remove(i);
            }
            (Err(i), Some(object)) => list.insert(i, object),
            (Err(_), None) => {}
        }
    }

    /// Monotonic publication counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn groups(&self) -> &[Arc<BackendGroup>] {
        &self.groups
    }

    /// Every replica, grouped or not, sorted by key.
    pub fn replicas(&self) -> Vec<Arc<Replica>> {
        let mut all: Vec<Arc<Replica>> = self
            .members
            .values()
            .flat_map(|list| list.iter())
            .chain(self.unassigned.iter())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.key().cmp(b.key()));
        all
    }

    pub fn replica(&self, key: &ObjectKey) -> Option<&Arc<Replica>> {
        self.members
            .values()
            .map(|list| list.as_slice())
            .chain(std::iter::once(self.unassigned.as_slice()))
            .find_map(|list| find(list, key, Replica::key))
    }

    /// All replicas assigned to `group`, ready or not, sorted by key.
    pub fn group_members(&self, group: &ObjectKey) -> &[Arc<Replica>] {
        self.members.get(group).map(|list| list.as_slice()).unwrap_or(&[])
    }

    pub fn backend_group_of(&self, replica: &ObjectKey) -> Option<&ObjectKey> {
        self.members
            .iter()
            .find(|(_, list)| contains(list, replica, Replica::key))
            .map(|(group, _)| group)
    }

    /// Gateway-level objects of `kind`, sorted by key.
    pub fn gateway_objects(&self, kind: ObjectKind) -> impl Iterator<Item = &Arc<GatewayObject>> + '_ {
        self.gateway_objects.iter().filter(move |o| o.kind() == kind)
    }

    pub fn gateway_object(&self, kind: ObjectKind, key: &ObjectKey) -> Option<&Arc<GatewayObject>> {
        self.gateway_objects
            .binary_search_by(|o| (o.kind(), o.key()).cmp(&(kind, key)))
            .ok()
            .map(|i| &self.gateway_objects[i])
    }

    /// Resolves a request to exactly one route.
    ///
    /// The most specific match wins (hostname, then path). Among equally
    /// specific matches the smallest route key wins.
    pub fn match_route(&self, host: &str, path: &str, headers: &[(&str, &str)]) -> Option<Arc<Route>> {
        let mut best: Option<(Specificity, &Arc<Route>)> = None;

        // Routes are sorted, so only a strictly better match replaces the
        // current one.
        for route in self.routes.iter() {
            let Some(score) = match_specificity(route.spec(), host, path, headers) else {
                continue;
            };
            let is_better = match &best {
                None => true,
                Some((best_score, _)) => score > *best_score,
            };
            if is_better {
                best = Some((score, route));
            }
        }

        best.map(|(_, route)| Arc::clone(route))
    }

    /// Ready replicas of every backend group the route references, sorted
    /// by key. The returned list is a fresh copy.
    pub fn candidate_replicas(&self, route: &Route) -> Vec<Arc<Replica>> {
        let groups: BTreeSet<ObjectKey> = route.backend_group_keys().collect();
        let mut candidates: Vec<Arc<Replica>> = groups
            .iter()
            .flat_map(|group| self.group_members(group))
            .filter(|replica| replica.is_eligible())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.key().cmp(b.key()));
        candidates
    }
}

fn contains<T>(items: &[Arc<T>], key: &ObjectKey, key_of: fn(&T) -> &ObjectKey) -> bool {
    find(items, key, key_of).is_some()
}

/// Binary search in a key-sorted slice.
pub(crate) fn find<'a, T>(
    items: &'a [Arc<T>],
    key: &ObjectKey,
    key_of: fn(&T) -> &ObjectKey,
) -> Option<&'a Arc<T>> {
    items
        .binary_search_by(|item| key_of(item).cmp(key))
        .ok()
        .map(|i| &items[i])
}

fn upsert_sorted<T>(
    items: &mut Vec<Arc<T>>,
    key: &ObjectKey,
    value: Option<Arc<T>>,
    key_of: fn(&T) -> &ObjectKey,
) {
    match (items.binary_search_by(|item| key_of(item).cmp(key)), value) {
        (Ok(i), Some(value)) => items[i] = value,
        (Ok(i), None) => {
            items.remove(i);
        }
        (Err(i), Some(value)) => items.insert(i, value),
        (Err(_), None) => {}
    }
}
