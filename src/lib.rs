mod config;
mod engine;
mod stats;
mod util;

pub mod error;
pub mod fetcher;
pub mod limiter;
pub mod proxy;
pub mod registry;
pub mod request;
pub mod rule;
pub mod scheduler;
pub mod script;
pub mod storage;
pub mod task;

// (Re) Exports
pub use config::Config;
pub use engine::{CrawlState, Engine};
pub use error::CrawlError;
pub use registry::TaskRegistry;
pub use request::Request;
pub use rule::{Context, Item, ParseFunc, ParseResult, RootFunc, Rule, RuleTree};
pub use scheduler::{ChannelScheduler, Scheduler};
pub use stats::Stats;
pub use storage::{DataCell, Storage};
pub use task::{Property, Seed, Task};
pub use util::join_url;

pub fn engine(
    registry: TaskRegistry,
    seeds: Vec<Seed>,
) -> Result<Engine<ChannelScheduler>, CrawlError> {
    engine_with_config(Config::default(), registry, seeds)
}

pub fn engine_with_config(
    config: Config,
    registry: TaskRegistry,
    seeds: Vec<Seed>,
) -> Result<Engine<ChannelScheduler>, CrawlError> {
    let scheduler = ChannelScheduler::with_buffer(config.scheduler_buffer);
    Engine::new(config, registry, seeds, scheduler)
}
