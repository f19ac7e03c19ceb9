//! Serializable views of the store for introspection.

use std::collections::BTreeMap;

use serde::Serialize;

use super::index::{find, RouteIndex};
use super::objects::{BackendGroup, GatewayObject, Replica, Route};
use crate::model::{ObjectKey, ObjectKind, RouteSpec};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    pub key: ObjectKey,
    pub endpoint: String,
    pub labels: BTreeMap<String, String>,
    pub ready: bool,
    pub backend_group: Option<ObjectKey>,
    pub running: u64,
    pub waiting: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub key: ObjectKey,
    #[serde(flatten)]
    pub spec: RouteSpec,
    /// Plugins activated for this route.
    pub active_plugins: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendGroupStatus {
    pub key: ObjectKey,
    pub match_labels: BTreeMap<String, String>,
    pub replicas: Vec<ObjectKey>,
    pub ready_replicas: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayObjectStatus {
    pub key: ObjectKey,
    pub kind: ObjectKind,
    pub spec: serde_json::Value,
}

/// Point-in-time copy of all objects of one kind, sorted by key.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Replicas(Vec<ReplicaStatus>),
    Routes(Vec<RouteStatus>),
    BackendGroups(Vec<BackendGroupStatus>),
    GatewayObjects(Vec<GatewayObjectStatus>),
}

impl Snapshot {
    pub fn len(&self) -> usize {
        match self {
            Self::Replicas(items) => items.len(),
            Self::Routes(items) => items.len(),
            Self::BackendGroups(items) => items.len(),
            Self::GatewayObjects(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        match self {
            Self::Replicas(items) => items.iter().map(|s| s.key.clone()).collect(),
            Self::Routes(items) => items.iter().map(|s| s.key.clone()).collect(),
            Self::BackendGroups(items) => items.iter().map(|s| s.key.clone()).collect(),
            Self::GatewayObjects(items) => items.iter().map(|s| s.key.clone()).collect(),
        }
    }
}

/// View of a single object.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ObjectStatus {
    Replica(ReplicaStatus),
    Route(RouteStatus),
    BackendGroup(BackendGroupStatus),
    Gateway(GatewayObjectStatus),
}

impl RouteIndex {
    pub fn snapshot(&self, kind: ObjectKind) -> Snapshot {
        match kind {
            ObjectKind::Replica => {
                Snapshot::Replicas(self.replicas().iter().map(|r| self.replica_status(r)).collect())
            }
            ObjectKind::Route => {
                Snapshot::Routes(self.routes().iter().map(|r| route_status(r)).collect())
            }
            ObjectKind::BackendGroup => Snapshot::BackendGroups(
                self.groups().iter().map(|g| self.group_status(g)).collect(),
            ),
            ObjectKind::Gateway | ObjectKind::HttpRoute | ObjectKind::InferencePool => {
                Snapshot::GatewayObjects(
                    self.gateway_objects(kind).map(|o| gateway_status(o)).collect(),
                )
            }
        }
    }

    pub fn status(&self, kind: ObjectKind, key: &ObjectKey) -> Option<ObjectStatus> {
        match kind {
            ObjectKind::Replica => self
                .replica(key)
                .map(|r| ObjectStatus::Replica(self.replica_status(r))),
            ObjectKind::Route => find(self.routes(), key, Route::key)
                .map(|r| ObjectStatus::Route(route_status(r))),
            ObjectKind::BackendGroup => find(self.groups(), key, BackendGroup::key)
                .map(|g| ObjectStatus::BackendGroup(self.group_status(g))),
            ObjectKind::Gateway | ObjectKind::HttpRoute | ObjectKind::InferencePool => self
                .gateway_object(kind, key)
                .map(|o| ObjectStatus::Gateway(gateway_status(o))),
        }
    }

    fn replica_status(&self, replica: &Replica) -> ReplicaStatus {
        let load = replica.load().snapshot();
        ReplicaStatus {
            key: replica.key().clone(),
            endpoint: replica.endpoint().to_string(),
            labels: replica.spec().labels.clone(),
            ready: replica.is_ready(),
            backend_group: self.backend_group_of(replica.key()).cloned(),
            running: load.running,
            waiting: load.waiting,
        }
    }

    fn group_status(&self, group: &BackendGroup) -> BackendGroupStatus {
        let members = self.group_members(group.key());
        BackendGroupStatus {
            key: group.key().clone(),
            match_labels: group.spec().match_labels.clone(),
            replicas: members.iter().map(|r| r.key().clone()).collect(),
            ready_replicas: members.iter().filter(|r| r.is_eligible()).count(),
        }
    }
}

fn route_status(route: &Route) -> RouteStatus {
    RouteStatus {
        key: route.key().clone(),
        spec: route.spec().clone(),
        active_plugins: route.policy().plugin_names(),
    }
}

fn gateway_status(object: &GatewayObject) -> GatewayObjectStatus {
    GatewayObjectStatus {
        key: object.key().clone(),
        kind: object.kind(),
        spec: object.spec().clone(),
    }
}
