// src/scheduler.rs

use crate::downloader::{Completion, DownloadWorker, TransferError};
use crate::models::{DownloadTask, TaskState};
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

/// Worker count used when the configured limit is zero.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Order in which pending tasks are handed to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadOrder {
    #[default]
    LargestFirst,
    SmallestFirst,
}

/// A task that reached a terminal state.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: DownloadTask,
    pub result: Result<Completion, TransferError>,
}

/// Pending tasks, shared by all workers. Each pop hands a task to exactly one worker.
#[derive(Debug)]
struct TaskQueue {
    queue: Mutex<VecDeque<DownloadTask>>,
}

impl TaskQueue {
    fn new(tasks: Vec<DownloadTask>) -> Self {
        Self {
            queue: Mutex::new(tasks.into()),
        }
    }

    async fn pop(&self) -> Option<DownloadTask> {
        let mut queue = self.queue.lock().await;
        queue.pop_front()
    }
}

/// Orders pending work once and runs it on a bounded pool of workers.
#[derive(Clone)]
pub struct DownloadScheduler {
    worker: DownloadWorker,
    concurrency: usize,
    order: DownloadOrder,
}

impl DownloadScheduler {
    pub fn new(worker: DownloadWorker, concurrency_limit: usize, order: DownloadOrder) -> Self {
        let concurrency = match concurrency_limit {
            0 => DEFAULT_CONCURRENCY,
            n => n,
        };
        Self {
            worker,
            concurrency,
            order,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Starts the workers and returns the outcomes in the order tasks finish.
    pub fn schedule(&self, mut tasks: Vec<DownloadTask>) -> Completions {
        sort_tasks(&mut tasks, self.order);
        let workers = self.concurrency.min(tasks.len()).max(1);
        let queue = Arc::new(TaskQueue::new(tasks));
        let (tx, rx) = mpsc::channel(workers);

        for id in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let worker = self.worker.clone();
            tokio::spawn(async move {
                while let Some(mut task) = queue.pop().await {
                    let result = if worker.cancellation().is_cancelled() {
                        task.state = TaskState::Failed(Some(TransferError::Cancelled.to_string()));
                        Err(TransferError::Cancelled)
                    } else {
                        debug!(worker = id, file = %task.file.file_name, size = task.size_bytes(), "task picked up");
                        worker.run(&mut task).await
                    };
                    if tx.send(TaskOutcome { task, result }).await.is_err() {
                        error!(worker = id, "completion receiver dropped, stopping worker");
                        break;
                    }
                }
            });
        }

        Completions { rx }
    }
}

fn sort_tasks(tasks: &mut [DownloadTask], order: DownloadOrder) {
    match order {
        DownloadOrder::LargestFirst => tasks.sort_by(|a, b| b.size_bytes().cmp(&a.size_bytes())),
        DownloadOrder::SmallestFirst => tasks.sort_by_key(|t| t.size_bytes()),
    }
}

/// Stream of finished tasks. Arrival order is completion order, not submission order.
#[derive(Debug)]
pub struct Completions {
    rx: mpsc::Receiver<TaskOutcome>,
}

impl Completions {
    pub async fn next(&mut self) -> Option<TaskOutcome> {
        self.rx.recv().await
    }
}

impl Stream for Completions {
    type Item = TaskOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
