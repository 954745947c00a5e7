use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fetcher::Fetcher;
use crate::limiter::RateLimit;
use crate::rule::RuleTree;
use crate::storage::Storage;

/// Static description of a crawl task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Task name, must be unique within a registry.
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub cookie: String,
    /// Upper bound, in seconds, of the random delay before each fetch.
    #[serde(default)]
    pub wait_time: u64,
    /// Whether already visited urls may be fetched again.
    #[serde(default)]
    pub reload: bool,
    #[serde(default)]
    pub max_depth: u32,
}

/// A named crawl configuration: its property, rule tree and the runtime
/// collaborators requests of this task are fetched, limited and stored with.
#[derive(Clone)]
pub struct Task {
    pub property: Property,
    pub rule: RuleTree,
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub storage: Option<Arc<dyn Storage>>,
    pub limiter: Option<Arc<dyn RateLimit>>,
}

impl Task {
    pub fn new(property: Property, rule: RuleTree) -> Self {
        Self {
            property,
            rule,
            fetcher: None,
            storage: None,
            limiter: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn name(&self) -> &str {
        &self.property.name
    }

    pub fn max_depth(&self) -> u32 {
        self.property.max_depth
    }

    pub fn reload(&self) -> bool {
        self.property.reload
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("property", &self.property)
            .field("rules", &self.rule.trunk.keys().collect::<Vec<_>>())
            .field("fetcher", &self.fetcher.is_some())
            .field("storage", &self.storage.is_some())
            .field("limiter", &self.limiter.is_some())
            .finish()
    }
}

/// Run-time wiring for a registered task.
///
/// Lets one statically declared rule set run with different fetch, storage
/// and rate-limit collaborators per run. Only the collaborators that are set
/// replace the registered ones.
#[derive(Clone, Default)]
pub struct Seed {
    pub name: String,
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub storage: Option<Arc<dyn Storage>>,
    pub limiter: Option<Arc<dyn RateLimit>>,
}

impl Seed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub(crate) fn apply(&self, task: &mut Task) {
        if let Some(fetcher) = &self.fetcher {
            task.fetcher = Some(fetcher.clone());
        }
        if let Some(storage) = &self.storage {
            task.storage = Some(storage.clone());
        }
        if let Some(limiter) = &self.limiter {
            task.limiter = Some(limiter.clone());
        }
    }
}
