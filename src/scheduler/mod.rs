use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::SchedulerError;
use crate::request::Request;

pub mod channel;

pub use channel::ChannelScheduler;

/// Frontier of pending requests.
///
/// Shared by every worker: many tasks may push and pull at once.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Starts the coordination task. Must run before `push`/`pull` make
    /// progress; it stops when `stop_tx` fires.
    fn schedule(&self, stop_tx: broadcast::Sender<()>) -> Result<JoinHandle<()>, SchedulerError>;

    /// Enqueue requests, waiting until the scheduler accepted each of them.
    async fn push(&self, reqs: Vec<Request>) -> Result<(), SchedulerError>;

    /// Waits for the next request.
    async fn pull(&self) -> Result<Request, SchedulerError>;

    /// Returns the number of requests waiting to be pulled.
    async fn len(&self) -> Result<usize, SchedulerError>;
}
