use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::engine::EngineState;
use crate::scheduler::Scheduler;

pub(super) fn start_reporting_thread<Sched>(
    state: Arc<EngineState<Sched>>,
    stop_tx: broadcast::Sender<()>,
) -> JoinHandle<()>
where
    Sched: 'static + Scheduler,
{
    let mut stop_rx = stop_tx.subscribe();
    let interval = Duration::from_secs(state.config.report_interval_secs);
    tokio::spawn(async move {
        'run: loop {
            let sleep = tokio::time::sleep(interval);
            tokio::pin!(sleep);

            tokio::select! {
                _ = stop_rx.recv() => {
                    break 'run;
                }
                _ = &mut sleep => {
                    let queued = match state.scheduler.len().await {
                        Ok(len) => len,
                        Err(_) => break 'run,
                    };
                    let stats = &state.stats;
                    log::info!(
                        "{} crawled at {} pages/minute, {} items at {} items/minute, {} failed, {} retried, {} dropped, {} queued, {} in flight",
                        stats.total_crawled(),
                        stats.crawled_per_minute(),
                        stats.total_items(),
                        stats.items_per_minute(),
                        stats.total_failed(),
                        stats.total_retried(),
                        stats.total_dropped(),
                        queued,
                        state.crawl.in_flight(),
                    );
                }
            }
        }
    })
}
