/*!
 * Bounded fan-out/fan-in over a fixed set of workers
 *
 * A [`WorkerPool`] spawns at most `concurrency` worker tasks that pull items
 * from one shared queue, so a batch of thousands of items never turns into
 * thousands of tasks. Every submitted item yields exactly one
 * [`TaskOutcome`]: panics inside the work become failed outcomes, and items
 * left in the queue after cancellation become `Cancelled` outcomes.
 */

use futures::FutureExt;
use prospect_core_resilience::{Cancelled, TaskOutcome, TaskPanicked};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::scan::types::{CandidateItem, SourceDescriptor};

/// Name used for an item's outcome when the work itself never produced one
pub trait TaskLabel {
    fn task_label(&self) -> String;
}

impl TaskLabel for String {
    fn task_label(&self) -> String {
        self.clone()
    }
}

impl TaskLabel for &str {
    fn task_label(&self) -> String {
        (*self).to_string()
    }
}

impl TaskLabel for usize {
    fn task_label(&self) -> String {
        self.to_string()
    }
}

impl TaskLabel for u32 {
    fn task_label(&self) -> String {
        self.to_string()
    }
}

impl TaskLabel for CandidateItem {
    fn task_label(&self) -> String {
        self.id.clone()
    }
}

impl TaskLabel for SourceDescriptor {
    fn task_label(&self) -> String {
        self.name.clone()
    }
}

/// Fixed-size pool of workers draining a shared queue
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    cancel: Option<CancellationToken>,
}

impl WorkerPool {
    /// Create a pool running at most `concurrency` items at once (minimum 1)
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: None,
        }
    }

    /// Stop handing out queued items once `token` is cancelled
    ///
    /// Items already running are left to finish.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `work` over every item and collect one outcome per item
    ///
    /// Outcomes arrive in completion order, not submission order.
    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, work: F) -> Vec<TaskOutcome<T, E>>
    where
        I: TaskLabel + Send + 'static,
        T: Send + 'static,
        E: From<TaskPanicked> + From<Cancelled> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutcome<T, E>> + Send + 'static,
    {
        self.run_with(items, work, |_: &TaskOutcome<T, E>| {}).await
    }

    /// Like [`run`](Self::run), calling `on_complete` as each item finishes
    ///
    /// `on_complete` runs on the worker that finished the item and is not
    /// called for items skipped because of cancellation.
    pub async fn run_with<I, T, E, F, Fut, C>(
        &self,
        items: Vec<I>,
        work: F,
        on_complete: C,
    ) -> Vec<TaskOutcome<T, E>>
    where
        I: TaskLabel + Send + 'static,
        T: Send + 'static,
        E: From<TaskPanicked> + From<Cancelled> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutcome<T, E>> + Send + 'static,
        C: Fn(&TaskOutcome<T, E>) + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<I>>()));
        let work = Arc::new(work);
        let on_complete = Arc::new(on_complete);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let workers = self.concurrency.min(total);

        let mut join_set = JoinSet::new();
        for worker_id in 0..workers {
            let queue = queue.clone();
            let work = work.clone();
            let on_complete = on_complete.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();

            join_set.spawn(async move {
                loop {
                    if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                        break;
                    }
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                    let Some(item) = next else { break };

                    let label = item.task_label();
                    let start = Instant::now();
                    let work = work.clone();
                    let outcome = match AssertUnwindSafe(async move { (*work)(item).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let panicked = TaskPanicked::from_payload(payload);
                            tracing::error!(
                                worker = worker_id,
                                task = %label,
                                "task panicked: {}",
                                panicked.0
                            );
                            TaskOutcome::new(label, Err(E::from(panicked)), start.elapsed(), 1)
                        }
                    };

                    let callback = AssertUnwindSafe(|| (*on_complete)(&outcome));
                    if std::panic::catch_unwind(callback).is_err() {
                        tracing::error!(
                            worker = worker_id,
                            task = %outcome.label,
                            "completion callback panicked"
                        );
                    }
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("pool worker terminated abnormally: {}", e);
            }
        }

        let leftover: Vec<I> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !leftover.is_empty() {
            tracing::info!(skipped = leftover.len(), "pool cancelled with items still queued");
        }
        for item in leftover {
            outcomes.push(TaskOutcome::not_run(item.task_label(), E::from(Cancelled)));
        }

        debug_assert_eq!(outcomes.len(), total);
        outcomes
    }
}
