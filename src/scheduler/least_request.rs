//! Least-request scoring.
//!
//! Scores replicas by how far their running request count sits below the
//! busiest candidate: the busiest scores 0, an idle replica scores 100,
//! linear in between. When every candidate is idle all score 100.

use serde::Deserialize;

use super::plugin::{Candidate, ScorePlugin, MAX_SCORE};
use crate::error::PluginError;

pub const NAME: &str = "least-request";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LeastRequestArgs {
    /// Replicas with at least this many waiting requests are filtered out.
    /// Zero disables the filter.
    #[serde(default)]
    max_waiting_requests: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LeastRequest {
    max_waiting_requests: u64,
}

impl LeastRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the plugin from its argument blob. `null` and `{}` both
    /// select the defaults.
    pub fn from_args(args: &serde_json::Value) -> Result<Self, PluginError> {
        let args = if args.is_null() {
            LeastRequestArgs::default()
        } else {
            LeastRequestArgs::deserialize(args).map_err(|e| PluginError::InvalidArgs {
                plugin: NAME.to_string(),
                reason: e.to_string(),
            })?
        };
        Ok(Self {
            max_waiting_requests: args.max_waiting_requests,
        })
    }

    pub fn max_waiting_requests(&self) -> u64 {
        self.max_waiting_requests
    }
}

impl ScorePlugin for LeastRequest {
    fn name(&self) -> &str {
        NAME
    }

    fn filter(&self, candidate: &Candidate) -> bool {
        self.max_waiting_requests == 0 || candidate.load.waiting < self.max_waiting_requests
    }

    fn score(&self, candidates: &[Candidate]) -> Vec<u32> {
        let max_running = candidates
            .iter()
            .map(|c| c.load.running)
            .max()
            .unwrap_or(0);

        if max_running == 0 {
            return vec![MAX_SCORE; candidates.len()];
        }

        candidates
            .iter()
            .map(|c| {
                let headroom = u128::from(max_running - c.load.running.min(max_running));
                // Integer division truncates: {1, 2, 3} scores {66, 33, 0}.
                (headroom * u128::from(MAX_SCORE) / u128::from(max_running)) as u32
            })
            .collect()
    }
}
