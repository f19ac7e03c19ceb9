//! Request routing and load accounting.
//!
//! Provides the dispatcher-facing [`Router`]: it matches a request to a
//! route, collects the route's ready replicas, lets the scheduler pick
//! one and tracks per-replica load for the request's lifetime.

mod load;
pub(crate) mod matcher;
mod router;

pub use load::{
    InflightRequest, LoadCounters, LoadSlot, LoadSnapshot, LoadStats, LoadStatsSnapshot,
    LoadTracker,
};
pub use router::{RouteDecision, Router, RouterStats};
