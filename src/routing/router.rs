//! Dispatcher entry point.

use std::sync::Arc;

use serde::Serialize;

use super::load::{InflightRequest, LoadStatsSnapshot, LoadTracker};
use crate::error::{Result, RouterError};
use crate::scheduler::{Scheduler, SchedulerStatsSnapshot};
use crate::store::{Datastore, Replica, Route, StoreStatsSnapshot};

/// Outcome of routing one request.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub route: Arc<Route>,
    pub replica: Arc<Replica>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RouterStats {
    pub store: StoreStatsSnapshot,
    pub scheduler: SchedulerStatsSnapshot,
    pub load: LoadStatsSnapshot,
}

/// Routes incoming requests to replicas.
///
/// Thread-safe via the shared [`Datastore`]. Each call works on one
/// index snapshot, so match, candidate collection and selection all see
/// the same cut of the store.
#[derive(Debug)]
pub struct Router {
    store: Arc<Datastore>,
    scheduler: Scheduler,
    load: Arc<LoadTracker>,
}

impl Router {
    /// Creates a new Router over the given store.
    pub fn new(store: Arc<Datastore>) -> Self {
        Self {
            store,
            scheduler: Scheduler::new(),
            load: Arc::new(LoadTracker::new()),
        }
    }

    /// Picks the replica for a request.
    pub fn route(&self, host: &str, path: &str, headers: &[(&str, &str)]) -> Result<Arc<Replica>> {
        self.decide(host, path, headers).map(|d| d.replica)
    }

    /// Like [`route`](Self::route), also returning the matched route.
    pub fn decide(&self, host: &str, path: &str, headers: &[(&str, &str)]) -> Result<RouteDecision> {
        let index = self.store.index();
        let route = index
            .match_route(host, path, headers)
            .ok_or_else(|| RouterError::RouteNotFound {
                host: host.to_string(),
                path: path.to_string(),
            })?;
        let candidates = index.candidate_replicas(&route);
        let replica = self.scheduler.select(&route, &candidates)?;
        Ok(RouteDecision { route, replica })
    }

    /// Records the start of a request on `replica`.
    pub fn begin_request(&self, replica: &Replica, queued: bool) {
        self.load.on_request_start(replica, queued);
    }

    /// Records the end of a request started with
    /// [`begin_request`](Self::begin_request). Must be called exactly once
    /// per admitted request, with the same `queued` flag.
    pub fn end_request(&self, replica: &Replica, queued: bool) {
        self.load.on_request_end(replica, queued);
    }

    /// Admits a request and returns a token that releases its load when
    /// finished or dropped.
    pub fn admit(&self, replica: Arc<Replica>, queued: bool) -> InflightRequest {
        self.load.admit(replica, queued)
    }

    pub fn store(&self) -> &Arc<Datastore> {
        &self.store
    }

    pub fn load_tracker(&self) -> &Arc<LoadTracker> {
        &self.load
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            store: self.store.stats(),
            scheduler: self.scheduler.stats(),
            load: self.load.stats(),
        }
    }
}
