use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::Config;
use crate::scheduler::Scheduler;
use crate::util;

use super::EngineState;
use super::worker_task::{install_panic_trace, start_worker_thread};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Initialized,
    Running,
    Panicked,
    Finished,
}

/// A fixed number of workers pulling from the shared scheduler.
///
/// A panic while processing a request is caught inside the worker, which
/// keeps going. A worker task that dies anyway is restarted by the monitor.
pub struct WorkerPool<Sched>
where
    Sched: Scheduler,
{
    config: Arc<Config>,
    state: Arc<EngineState<Sched>>,
    worker_states: Arc<Mutex<Vec<WorkerState>>>,
    join_handle: Option<JoinHandle<()>>,
}

impl<Sched> WorkerPool<Sched>
where
    Sched: 'static + Scheduler,
{
    pub fn new(config: Arc<Config>, state: Arc<EngineState<Sched>>) -> Self {
        Self {
            config,
            state,
            worker_states: Arc::new(Mutex::new(vec![])),
            join_handle: None,
        }
    }

    pub fn start(&mut self, stop_tx: broadcast::Sender<()>) {
        install_panic_trace();

        let monitor_notify = Arc::new(Notify::new());
        let worker_notify = monitor_notify.clone();

        // The monitor wakes up whenever a worker task ends
        let worker_states = self.worker_states.clone();
        let state = self.state.clone();
        let monitor_stop_tx = stop_tx.clone();
        let monitor_handle = tokio::spawn(async move {
            loop {
                monitor_notify.notified().await;

                // Restart dead workers
                {
                    let mut worker_guard = util::lock(&worker_states);
                    for (idx, ws) in worker_guard.iter_mut().enumerate() {
                        if *ws == WorkerState::Panicked {
                            *ws = WorkerState::Initialized;

                            spawn_worker_and_monitor_thread(
                                (idx + 1) as u32,
                                state.clone(),
                                worker_states.clone(),
                                monitor_stop_tx.clone(),
                                monitor_notify.clone(),
                            );
                        }
                    }
                }

                let finished = util::lock(&worker_states)
                    .iter()
                    .all(|x| *x == WorkerState::Finished);
                if finished {
                    break;
                }
            }
        });
        self.join_handle = Some(monitor_handle);

        {
            let mut worker_states = util::lock(&self.worker_states);
            for _ in 0..self.config.workers {
                worker_states.push(WorkerState::Initialized);
            }
        }

        for i in 0..self.config.workers {
            spawn_worker_and_monitor_thread(
                i + 1,
                self.state.clone(),
                self.worker_states.clone(),
                stop_tx.clone(),
                worker_notify.clone(),
            )
        }
        log::debug!("{} workers started", self.config.workers);
    }

    // Wait for all workers to complete
    pub async fn join(&mut self) {
        if let Some(h) = self.join_handle.take() {
            if let Err(e) = h.await {
                log::error!("worker monitor failed: {}", e);
            }
        }
    }
}

fn spawn_worker_and_monitor_thread<Sched>(
    worker_id: u32,
    state: Arc<EngineState<Sched>>,
    worker_states: Arc<Mutex<Vec<WorkerState>>>,
    stop_tx: broadcast::Sender<()>,
    monitor_notify: Arc<Notify>,
) where
    Sched: 'static + Scheduler,
{
    let handle = start_worker_thread(worker_id, state, worker_states.clone(), stop_tx);

    tokio::spawn(async move {
        let next = match handle.await {
            Ok(()) => WorkerState::Finished,
            Err(e) => {
                log::error!("[worker-{}] died: {}", worker_id, e);
                WorkerState::Panicked
            }
        };

        {
            let worker_idx = (worker_id - 1) as usize;
            let mut worker_states = util::lock(&worker_states);
            if worker_states[worker_idx] != WorkerState::Running {
                log::warn!(
                    "[worker-{}] ended in state {:?}",
                    worker_id,
                    worker_states[worker_idx]
                );
            }
            worker_states[worker_idx] = next;
        }

        monitor_notify.notify_one();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::registry::TaskRegistry;
    use crate::scheduler::ChannelScheduler;

    #[tokio::test]
    async fn test_workers_finish_on_stop() {
        let config = Config {
            workers: 3,
            ..Default::default()
        };
        let engine = Engine::new(
            config.clone(),
            TaskRegistry::new(),
            vec![],
            ChannelScheduler::new(),
        )
        .unwrap();
        let stop_tx = engine.stop_handle();
        let _scheduler = engine.state.scheduler.schedule(stop_tx.clone()).unwrap();

        let mut pool = WorkerPool::new(Arc::new(config), engine.state.clone());
        pool.start(stop_tx.clone());
        assert_eq!(util::lock(&pool.worker_states).len(), 3);

        stop_tx.send(()).unwrap();
        pool.join().await;
        assert!(util::lock(&pool.worker_states)
            .iter()
            .all(|s| *s == WorkerState::Finished));
    }
}
