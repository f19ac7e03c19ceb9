//! Scoring plugin capability and the named plugin registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::PluginError;
use crate::model::PluginConfig;
use crate::routing::LoadSnapshot;
use crate::store::Replica;

/// Highest score a plugin may assign.
pub const MAX_SCORE: u32 = 100;

/// A replica as seen by plugins during one scheduling decision.
///
/// `load` is read once per decision so every plugin scores the same
/// counter values.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub replica: Arc<Replica>,
    pub load: LoadSnapshot,
}

impl Candidate {
    pub fn capture(replica: Arc<Replica>) -> Self {
        let load = replica.load().snapshot();
        Self { replica, load }
    }
}

/// A scoring strategy.
///
/// Implementations must be pure in-memory computation: no I/O, no
/// blocking and no mutation of replica state.
pub trait ScorePlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether `candidate` may be scored at all. Defaults to admitting
    /// every candidate.
    fn filter(&self, _candidate: &Candidate) -> bool {
        true
    }

    /// One score in `[0, MAX_SCORE]` per candidate, aligned by index.
    fn score(&self, candidates: &[Candidate]) -> Vec<u32>;
}

/// Builds a plugin instance from its opaque argument blob.
pub type PluginFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn ScorePlugin>, PluginError> + Send + Sync>;

/// Plugins registered by name at startup.
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry holding the built-in plugins.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::least_request::NAME, |args| {
            super::LeastRequest::from_args(args).map(|p| Arc::new(p) as Arc<dyn ScorePlugin>)
        });
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn ScorePlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Sorted plugin names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiates every configured plugin. Fails on the first unknown
    /// name or invalid argument blob.
    pub fn activate(&self, configs: &[PluginConfig]) -> Result<SchedulingPolicy, PluginError> {
        if configs.is_empty() {
            return Err(PluginError::Empty);
        }
        let plugins = configs
            .iter()
            .map(|config| {
                let factory = self
                    .factories
                    .get(&config.name)
                    .ok_or_else(|| PluginError::UnknownPlugin(config.name.clone()))?;
                factory(&config.args)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SchedulingPolicy { plugins })
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

/// The plugins active for one route.
#[derive(Debug, Clone)]
pub struct SchedulingPolicy {
    plugins: Vec<Arc<dyn ScorePlugin>>,
}

impl SchedulingPolicy {
    pub fn plugins(&self) -> &[Arc<dyn ScorePlugin>] {
        &self.plugins
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }
}
