use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::SchedulerError;
use crate::request::Request;
use crate::util;

use super::Scheduler;

pub const DEFAULT_BUFFER: usize = 32;

#[derive(Debug)]
enum SchedulerIpc {
    Push(Request),
    Pull { tx: oneshot::Sender<Request> },
    Len { tx: oneshot::Sender<usize> },
}

/// Priority-first scheduler run by a single coordinator task.
///
/// The coordinator owns a priority queue and a normal queue and is the only
/// one touching them; callers talk to it through messages. Requests with a
/// priority above zero always go out before normal ones, FIFO within each
/// queue. A steady stream of priority requests starves the normal queue.
pub struct ChannelScheduler {
    request_tx: mpsc::Sender<SchedulerIpc>,
    request_rx: Mutex<Option<mpsc::Receiver<SchedulerIpc>>>,
}

impl ChannelScheduler {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// `buffer` bounds how many messages may wait for the coordinator before
    /// `push` starts waiting.
    pub fn with_buffer(buffer: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel(buffer.max(1));
        Self {
            request_tx,
            request_rx: Mutex::new(Some(request_rx)),
        }
    }

    async fn send(&self, msg: SchedulerIpc) -> Result<(), SchedulerError> {
        self.request_tx
            .send(msg)
            .await
            .map_err(|_| SchedulerError::Closed)
    }
}

impl Default for ChannelScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for ChannelScheduler {
    fn schedule(&self, stop_tx: broadcast::Sender<()>) -> Result<JoinHandle<()>, SchedulerError> {
        let rx = util::lock(&self.request_rx)
            .take()
            .ok_or(SchedulerError::AlreadyRunning)?;
        Ok(start_coordinator_thread(rx, stop_tx))
    }

    async fn push(&self, reqs: Vec<Request>) -> Result<(), SchedulerError> {
        for req in reqs {
            self.send(SchedulerIpc::Push(req)).await?;
        }
        Ok(())
    }

    async fn pull(&self) -> Result<Request, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerIpc::Pull { tx }).await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    async fn len(&self) -> Result<usize, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerIpc::Len { tx }).await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }
}

#[derive(Default)]
struct Queues {
    priority: VecDeque<Request>,
    normal: VecDeque<Request>,
    // Pullers waiting for a request, oldest first.
    waiters: VecDeque<oneshot::Sender<Request>>,
}

impl Queues {
    fn enqueue(&mut self, req: Request) {
        if req.priority > 0 {
            self.priority.push_back(req);
        } else {
            self.normal.push_back(req);
        }
    }

    fn requeue_front(&mut self, req: Request) {
        if req.priority > 0 {
            self.priority.push_front(req);
        } else {
            self.normal.push_front(req);
        }
    }

    fn next(&mut self) -> Option<Request> {
        self.priority.pop_front().or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    /// Hands queued requests to waiting pullers.
    fn dispatch(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            let Some(req) = self.next() else {
                self.waiters.push_front(tx);
                break;
            };
            // The puller went away; keep the request for the next one.
            if let Err(req) = tx.send(req) {
                self.requeue_front(req);
            }
        }
    }
}

fn start_coordinator_thread(
    mut rx: mpsc::Receiver<SchedulerIpc>,
    stop_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut stop_rx = stop_tx.subscribe();
    tokio::spawn(async move {
        let mut queues = Queues::default();
        'run: loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    break 'run;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerIpc::Push(req)) => queues.enqueue(req),
                        Some(SchedulerIpc::Pull { tx }) => queues.waiters.push_back(tx),
                        Some(SchedulerIpc::Len { tx }) => {
                            let _ = tx.send(queues.len());
                        }
                        None => break 'run,
                    }
                }
            }
            queues.dispatch();
        }
        log::debug!(
            "scheduler stopped with {} requests queued, {} pulls waiting",
            queues.len(),
            queues.waiters.len()
        );
    })
}
