//! Replica selection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::plugin::{Candidate, MAX_SCORE};
use crate::error::{Result, RouterError};
use crate::store::{Replica, Route};

#[derive(Debug, Default)]
struct SchedulerStats {
    selections: AtomicU64,
    no_eligible_backend: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    pub selections: u64,
    pub no_eligible_backend: u64,
}

/// Picks one replica per request from a route's candidates.
///
/// Selection is deterministic: the highest combined score wins and ties
/// go to the smallest replica key. It never blocks and its cost is bounded
/// by the candidate count times the plugins' cost.
#[derive(Debug, Default)]
pub struct Scheduler {
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the winning replica for `route` among `candidates`.
    pub fn select(&self, route: &Route, candidates: &[Arc<Replica>]) -> Result<Arc<Replica>> {
        match self.pick(route, candidates) {
            Some(replica) => {
                self.stats.selections.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(route = %route.key(), replica = %replica.key(), "replica selected");
                Ok(replica)
            }
            None => {
                self.stats.no_eligible_backend.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    route = %route.key(),
                    candidates = candidates.len(),
                    "no eligible backend"
                );
                Err(RouterError::NoEligibleBackend {
                    route: route.key().clone(),
                })
            }
        }
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            selections: self.stats.selections.load(Ordering::Relaxed),
            no_eligible_backend: self.stats.no_eligible_backend.load(Ordering::Relaxed),
        }
    }

    fn pick(&self, route: &Route, candidates: &[Arc<Replica>]) -> Option<Arc<Replica>> {
        if candidates.is_empty() {
            return None;
        }

        let plugins = route.policy().plugins();
        let candidates: Vec<Candidate> = candidates
            .iter()
            .map(|replica| Candidate::capture(Arc::clone(replica)))
            .filter(|candidate| plugins.iter().all(|p| p.filter(candidate)))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // Equal-weight sum of every plugin's score.
        let mut totals = vec![0u64; candidates.len()];
        for plugin in plugins {
            let scores = plugin.score(&candidates);
            for (total, score) in totals.iter_mut().zip(scores) {
                *total += u64::from(score.min(MAX_SCORE));
            }
        }

        candidates
            .iter()
            .zip(totals)
            .max_by(|(a, a_total), (b, b_total)| {
                a_total
                    .cmp(b_total)
                    .then_with(|| b.replica.key().cmp(a.replica.key()))
            })
            .map(|(candidate, _)| Arc::clone(&candidate.replica))
    }
}
