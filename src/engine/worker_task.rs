use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Once};

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{CrawlError, FetchError};
use crate::request::Request;
use crate::rule::Context;
use crate::scheduler::Scheduler;
use crate::util;

use super::EngineState;
use super::worker_pool::WorkerState;

pub(super) fn start_worker_thread<Sched>(
    worker_id: u32,
    state: Arc<EngineState<Sched>>,
    worker_states: Arc<Mutex<Vec<WorkerState>>>,
    stop_tx: broadcast::Sender<()>,
) -> JoinHandle<()>
where
    Sched: 'static + Scheduler,
{
    log::debug!("[worker-{}] start", worker_id);
    let mut stop_rx = stop_tx.subscribe();
    tokio::spawn(async move {
        {
            let mut worker_states = util::lock(&worker_states);
            worker_states[(worker_id - 1) as usize] = WorkerState::Running;
        }

        'run: loop {
            let req = tokio::select! {
                _ = stop_rx.recv() => {
                    break 'run;
                }
                res = state.scheduler.pull() => {
                    match res {
                        Ok(req) => req,
                        Err(e) => {
                            log::debug!("[worker-{}] {}", worker_id, e);
                            break 'run;
                        }
                    }
                }
            };

            let url = req.url.clone();
            let outcome = AssertUnwindSafe(process(worker_id, &state, req))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                log::error!(
                    "[worker-{}] panic while processing {}: {}\n{}",
                    worker_id,
                    url,
                    panic_message(payload.as_ref()),
                    take_panic_trace().unwrap_or_default(),
                );
            }
            state.finish();
        }
        log::debug!("[worker-{}] stop", worker_id);
    })
}

async fn process<Sched>(worker_id: u32, state: &EngineState<Sched>, req: Request)
where
    Sched: Scheduler,
{
    if let Err(e) = req.check() {
        log::warn!("[worker-{}] {}", worker_id, e);
        state.stats.incr_total_dropped();
        return;
    }

    let unique = req.unique();
    if !state.crawl.try_mark_visited(&unique) && !req.task.reload() {
        log::debug!("[worker-{}] already visited {}", worker_id, req.url);
        state.stats.incr_total_dropped();
        return;
    }

    log::info!("[worker-{}] {}", worker_id, req.url);
    let deadline = state
        .config
        .rate_limit_timeout()
        .map(|timeout| Instant::now() + timeout);
    let body = match req.fetch(deadline).await {
        Ok(body) if body.len() < state.config.min_body_len => Err(FetchError::BodyTooShort {
            len: body.len(),
            min: state.config.min_body_len,
        }),
        res => res,
    };
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            log::error!("[worker-{}] fetch {} failed: {}", worker_id, req.url, e);
            set_failure(worker_id, state, req).await;
            return;
        }
    };
    state.stats.incr_total_crawled();

    let task = req.task.clone();
    let Some(rule) = task.rule.trunk.get(&req.rule_name) else {
        let e = CrawlError::RuleNotFound {
            task: task.name().to_owned(),
            rule: req.rule_name.clone(),
        };
        log::error!("[worker-{}] {}", worker_id, e);
        state.stats.incr_total_dropped();
        return;
    };

    let ctx = Context::new(body, req);
    let result = match rule.parse.evaluate(&ctx) {
        Ok(result) => result,
        Err(e) => {
            log::error!(
                "[worker-{}] parse {} failed: {}",
                worker_id,
                ctx.req.url,
                CrawlError::from(e)
            );
            return;
        }
    };

    if let Err(e) = state.submit(result.requests.clone()).await {
        log::warn!("[worker-{}] can't push requests: {}", worker_id, e);
    }
    if result.items.is_empty() {
        return;
    }
    if state.result_tx.send(result).await.is_err() {
        log::debug!("[worker-{}] result channel closed", worker_id);
    }
}

async fn set_failure<Sched>(worker_id: u32, state: &EngineState<Sched>, req: Request)
where
    Sched: Scheduler,
{
    state.stats.incr_total_failed();
    if !state.crawl.record_failure(&req) {
        log::warn!("[worker-{}] giving up on {}", worker_id, req.url);
        return;
    }

    log::info!("[worker-{}] retry {}", worker_id, req.url);
    state.stats.incr_total_retried();
    if let Err(e) = state.submit(vec![req]).await {
        log::warn!("[worker-{}] can't push retry: {}", worker_id, e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = RefCell::new(None);
}

static PANIC_HOOK: Once = Once::new();

/// Chains a panic hook that keeps a backtrace of the last panic on the
/// panicking thread, so a caught panic can be logged with its trace.
pub(super) fn install_panic_trace() {
    PANIC_HOOK.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            prev(info);
        }));
    });
}

fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.with(|t| t.borrow_mut().take())
}
