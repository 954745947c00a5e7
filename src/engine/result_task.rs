use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::rule::{Item, ParseResult};
use crate::scheduler::Scheduler;

use super::EngineState;

/// Routes extracted items until stopped: records go to the storage of the
/// task that produced them, everything is logged. Results still buffered
/// when the stop signal arrives are handled before returning.
pub(super) async fn handle_results<Sched>(
    state: Arc<EngineState<Sched>>,
    mut result_rx: mpsc::Receiver<ParseResult>,
    mut stop_rx: broadcast::Receiver<()>,
) where
    Sched: 'static + Scheduler,
{
    'run: loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break 'run;
            }
            res = result_rx.recv() => {
                match res {
                    Some(result) => handle_result(&state, result).await,
                    None => break 'run,
                }
            }
        }
    }

    while let Ok(result) = result_rx.try_recv() {
        handle_result(&state, result).await;
    }
    log::debug!("result dispatcher stopped");
}

async fn handle_result<Sched>(state: &EngineState<Sched>, result: ParseResult)
where
    Sched: Scheduler,
{
    state.stats.add_total_items(result.items.len() as u64);
    for item in result.items {
        match item {
            Item::Record(cell) => {
                log::info!("[{}] {} {}", cell.task_name(), cell.url, cell.data);
                let task = match state.registry.lookup(cell.task_name()) {
                    Ok(task) => task,
                    Err(e) => {
                        log::error!("can't store record from {}: {}", cell.url, e);
                        continue;
                    }
                };
                match &task.storage {
                    Some(storage) => {
                        if let Err(e) = storage.save(&cell).await {
                            log::error!("[{}] save {} failed: {}", task.name(), cell.url, e);
                        }
                    }
                    None => log::warn!("[{}] no storage, record dropped", task.name()),
                }
            }
            Item::Data(data) => log::info!("{}", data),
        }
    }
}
