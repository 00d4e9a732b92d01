//! Execution side of the task facility.
//!
//! `CronRunner` polls for due tasks, claims each one (deleting its row) and
//! hands it to the [`TaskHandler`] registered for its hook.  A failing
//! handler is logged and the task is gone: there is no automatic retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::{QueueError, ScheduledTask, TaskQueue};

/// Runs tasks for one hook name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &ScheduledTask) -> Result<(), QueueError>;
}

/// Outcome counts of one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Tasks with no registered handler or undecodable arguments.
    pub dropped: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.dropped
    }
}

pub struct CronRunner {
    queue: TaskQueue,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    batch_size: usize,
}

impl CronRunner {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue, handlers: HashMap::new(), batch_size: 50 }
    }

    /// Register the handler for `hook`, replacing any previous one.
    pub fn register(&mut self, hook: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(hook.into(), handler);
        self
    }

    /// Maximum number of tasks processed per pass.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run every task due at `now`.
    #[instrument(skip(self))]
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<RunSummary, QueueError> {
        let mut summary = RunSummary::default();

        for row in self.queue.due(now, self.batch_size).await? {
            // Another worker got there first.
            if !self.queue.claim(&row.id).await? {
                continue;
            }

            let task = match ScheduledTask::try_from(row) {
                Ok(task) => task,
                Err(e) => {
                    warn!("dropping task: {e}");
                    summary.dropped += 1;
                    continue;
                }
            };

            let Some(handler) = self.handlers.get(&task.hook) else {
                warn!(task_id = %task.id, hook = %task.hook, "no handler registered, dropping task");
                summary.dropped += 1;
                continue;
            };

            match handler.handle(&task).await {
                Ok(()) => summary.completed += 1,
                Err(e) => {
                    error!(task_id = %task.id, hook = %task.hook, "task failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        if summary.total() > 0 {
            info!(
                "cron pass finished: {} completed, {} failed, {} dropped",
                summary.completed, summary.failed, summary.dropped
            );
        }
        Ok(summary)
    }

    /// Poll every `interval` until `shutdown` becomes `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due(Utc::now()).await {
                        error!("cron pass failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("cron runner stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<serde_json::Value>>,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self { seen: Mutex::new(Vec::new()), fail })
        }
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &ScheduledTask) -> Result<(), QueueError> {
            self.seen.lock().unwrap().push(task.args.clone());
            if self.fail {
                return Err(QueueError::Handler { task_id: task.id.clone(), message: "boom".into() });
            }
            Ok(())
        }
    }

    async fn queue() -> TaskQueue {
        TaskQueue::new(db::pool::create_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn due_tasks_run_once_and_future_tasks_wait() {
        let queue = queue().await;
        let now = Utc::now();
        queue.schedule_single("send", &json!({"n": 1}), now - ChronoDuration::seconds(1)).await.unwrap();
        queue.schedule_single("send", &json!({"n": 2}), now).await.unwrap();
        let future = queue.schedule_single("send", &json!({"n": 3}), now + ChronoDuration::hours(1)).await.unwrap();

        let recorder = Recorder::new(false);
        let mut runner = CronRunner::new(queue.clone());
        runner.register("send", recorder.clone());

        let summary = runner.run_due(now).await.unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![json!({"n": 1}), json!({"n": 2})]);

        let again = runner.run_due(now).await.unwrap();
        assert_eq!(again.total(), 0);
        assert!(queue.find(&future.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unscheduled_tasks_never_run() {
        let queue = queue().await;
        let now = Utc::now();
        let task = queue.schedule_single("send", &json!({}), now).await.unwrap();
        assert!(queue.unschedule(&task.id).await.unwrap());
        assert!(!queue.unschedule(&task.id).await.unwrap());

        let recorder = Recorder::new(false);
        let mut runner = CronRunner::new(queue);
        runner.register("send", recorder.clone());
        assert_eq!(runner.run_due(now).await.unwrap().total(), 0);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_and_unknown_hooks_are_not_retried() {
        let queue = queue().await;
        let now = Utc::now();
        queue.schedule_single("send", &json!({}), now).await.unwrap();
        queue.schedule_single("unknown", &json!({}), now).await.unwrap();

        let mut runner = CronRunner::new(queue.clone());
        runner.register("send", Recorder::new(true));

        let summary = runner.run_due(now).await.unwrap();
        assert_eq!(summary, RunSummary { completed: 0, failed: 1, dropped: 1 });
        assert_eq!(queue.pending().await.unwrap(), 0);
    }
}
