use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

mod crawl_state;
mod reporting_task;
mod result_task;
mod worker_pool;
mod worker_task;

use crate::Config;
use crate::error::{CrawlError, SchedulerError};
use crate::registry::TaskRegistry;
use crate::request::Request;
use crate::rule::ParseResult;
use crate::scheduler::Scheduler;
use crate::stats::Stats;
use crate::task::{Seed, Task};

pub use crawl_state::CrawlState;

use reporting_task::start_reporting_thread;
use result_task::handle_results;
use worker_pool::WorkerPool;

pub struct EngineState<Sched>
where
    Sched: Scheduler,
{
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    scheduler: Sched,
    crawl: CrawlState,
    stats: Stats,
    result_tx: mpsc::Sender<ParseResult>,
    stop_tx: broadcast::Sender<()>,
}

impl<Sched> EngineState<Sched>
where
    Sched: Scheduler,
{
    /// Pushes requests, counting them as in flight first so the engine
    /// never looks idle while they are on their way to the scheduler.
    async fn submit(&self, reqs: Vec<Request>) -> Result<(), SchedulerError> {
        if reqs.is_empty() {
            return Ok(());
        }
        self.crawl.add_in_flight(reqs.len());
        self.scheduler.push(reqs).await
    }

    /// Called once a pulled request is fully handled, after anything it
    /// produced was submitted.
    fn finish(&self) {
        if self.crawl.finish_in_flight() && self.config.exit_when_idle {
            log::info!("Frontier empty, stopping");
            let _ = self.stop_tx.send(());
        }
    }
}

// Note that `config` and `registry` are read-only once the engine is built,
// so they don't need to be protected by a mutex.
pub struct Engine<Sched>
where
    Sched: Scheduler,
{
    state: Arc<EngineState<Sched>>,
    seeds: Vec<Arc<Task>>,
    result_rx: Option<mpsc::Receiver<ParseResult>>,
}

impl<Sched> Engine<Sched>
where
    Sched: 'static + Scheduler,
{
    /// Binds every seed to its registered task and freezes the registry.
    pub fn new(
        config: Config,
        mut registry: TaskRegistry,
        seeds: Vec<Seed>,
        scheduler: Sched,
    ) -> Result<Self, CrawlError> {
        config.sanity_check()?;

        let mut tasks = vec![];
        for seed in seeds.iter() {
            tasks.push(registry.bind(seed)?);
        }

        let (result_tx, result_rx) = mpsc::channel(config.result_buffer);
        let (stop_tx, _) = broadcast::channel::<()>(32);
        let state = EngineState {
            config: Arc::new(config),
            registry: Arc::new(registry),
            scheduler,
            crawl: CrawlState::new(),
            stats: Stats::new(),
            result_tx,
            stop_tx,
        };
        Ok(Self {
            state: Arc::new(state),
            seeds: tasks,
            result_rx: Some(result_rx),
        })
    }

    /// Sending on the returned channel stops the crawl.
    pub fn stop_handle(&self) -> broadcast::Sender<()> {
        self.state.stop_tx.clone()
    }

    pub fn stats(&self) -> &Stats {
        &self.state.stats
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.state.registry
    }

    /// Requests whose fetch failed at least once.
    pub fn failures(&self) -> Vec<Request> {
        self.state.crawl.failures()
    }

    /// Runs the crawl until it is stopped, or until the frontier is empty
    /// when `exit_when_idle` is set. Can only be called once.
    pub async fn start(&mut self) -> Result<(), CrawlError> {
        let result_rx = self
            .result_rx
            .take()
            .ok_or(SchedulerError::AlreadyRunning)?;
        let config = self.state.config.clone();
        let stop_tx = self.state.stop_tx.clone();
        let stop_rx = stop_tx.subscribe();

        let scheduler_handle = self.state.scheduler.schedule(stop_tx.clone())?;

        let mut reqs = vec![];
        for task in self.seeds.iter() {
            match task.rule.root.evaluate(task) {
                Ok(mut roots) => {
                    log::debug!("[{}] {} seed requests", task.name(), roots.len());
                    reqs.append(&mut roots);
                }
                Err(e) => {
                    log::error!("[{}] get root failed: {}", task.name(), e);
                }
            }
        }

        let mut pool = WorkerPool::new(config.clone(), self.state.clone());
        pool.start(stop_tx.clone());
        let reporting_handle = start_reporting_thread(self.state.clone(), stop_tx.clone());

        if reqs.is_empty() {
            log::warn!("No seed requests to crawl");
            if config.exit_when_idle {
                let _ = stop_tx.send(());
            }
        } else {
            self.state.submit(reqs).await?;
        }

        handle_results(self.state.clone(), result_rx, stop_rx).await;

        pool.join().await;
        for (name, handle) in [("reporter", reporting_handle), ("scheduler", scheduler_handle)] {
            if let Err(e) = handle.await {
                log::error!("{} task failed: {}", name, e);
            }
        }

        log::info!(
            "Exit gracefully: {} crawled, {} failed, {} items",
            self.state.stats.total_crawled(),
            self.state.stats.total_failed(),
            self.state.stats.total_items(),
        );
        Ok(())
    }
}
