//! Pluggable replica scheduling.
//!
//! A route's [`SchedulingPolicy`] is a list of [`ScorePlugin`]s activated
//! from the route's configuration. The [`Scheduler`] filters candidates
//! through every plugin, sums their scores and picks the best replica.

pub mod least_request;
mod plugin;
mod scheduler;

pub use least_request::LeastRequest;
pub use plugin::{Candidate, PluginFactory, PluginRegistry, ScorePlugin, SchedulingPolicy, MAX_SCORE};
pub use scheduler::{Scheduler, SchedulerStatsSnapshot};
