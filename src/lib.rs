//! Routing decision engine for model-serving traffic.
//!
//! Watch events describing replicas, routes and backend groups feed a
//! [`Datastore`]; a [`Router`] matches each request to a route, scores
//! the route's ready replicas with its scheduling plugins and tracks the
//! resulting per-replica load.

pub mod config;
pub mod debug;
pub mod error;
pub mod model;
pub mod routing;
pub mod scheduler;
pub mod store;

pub use config::RouterConfig;
pub use error::{PluginError, Result, RouterError};
pub use routing::{InflightRequest, LoadTracker, Router};
pub use scheduler::{PluginRegistry, Scheduler, ScorePlugin};
pub use store::{Datastore, WatchEvent};
