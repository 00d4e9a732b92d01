//! Channel dispatcher.
//!
//! Delivers rendered notifications either inline ([`Dispatcher::send_now`])
//! or through one deferred task per receiver ([`Dispatcher::schedule`]).
//! Every attempt ends as exactly one log row; transport failures are
//! recorded, never retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use channels::DeliveryContext;
use db::models::LogStatus;
use db::repository::notification_log as log_repo;
use queue::{QueueError, ScheduledTask, TaskHandler};

use crate::content::RenderContext;
use crate::context::{AppContext, DispatchContext};
use crate::events::EventDescriptor;
use crate::host::User;
use crate::log::{new_entry, set_receiver, NotificationLog};
use crate::models::WorkflowId;
use crate::receivers::Receiver;
use crate::store::WorkflowStore;
use crate::EngineError;

/// Hook name of deferred deliveries.
pub const SEND_NOTIFICATION_HOOK: &str = "planner_send_notification";

/// Arguments carried by a deferred delivery task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub workflow_id: WorkflowId,
    pub event: EventDescriptor,
    pub receiver: Receiver,
}

/// Counts of one synchronous dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub sent: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    ctx: Arc<AppContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Deliver to every receiver now, one log row each.
    #[instrument(skip_all, fields(workflow_id = dispatch.workflow.id, post_id = dispatch.post_id()))]
    pub async fn send_now(&self, dispatch: &DispatchContext, receivers: &[Receiver]) -> Result<SendSummary, EngineError> {
        let log = NotificationLog::new(self.ctx.clone());
        let author = self.post_author(dispatch).await;
        let mut summary = SendSummary::default();

        for receiver in receivers {
            let attempt = self.deliver(dispatch, receiver, author.as_ref(), false).await;
            let status = if attempt.error.is_none() { LogStatus::Success } else { LogStatus::Error };
            match status {
                LogStatus::Success => summary.sent += 1,
                _ => summary.failed += 1,
            }

            let mut entry = new_entry(dispatch, self.ctx.config.site.id, status, self.ctx.clock.now());
            set_receiver(&mut entry, receiver);
            entry.subject = Some(attempt.subject);
            entry.error = attempt.error;
            log.record(&entry).await?;
        }

        Ok(summary)
    }

    /// Queue one task per receiver, spread by the configured step, and log a
    /// `scheduled` row linked to each task.
    #[instrument(skip_all, fields(workflow_id = dispatch.workflow.id, post_id = dispatch.post_id()))]
    pub async fn schedule(&self, dispatch: &DispatchContext, receivers: &[Receiver]) -> Result<usize, EngineError> {
        let log = NotificationLog::new(self.ctx.clone());
        let author = self.post_author(dispatch).await;
        let config = &self.ctx.config;
        let now = self.ctx.clock.now();
        let initial = Duration::seconds(i64::try_from(config.cron_initial_delay_secs).unwrap_or(i64::MAX / 1000));
        let step = i64::try_from(config.cron_offset_step_secs).unwrap_or(0);

        for (i, receiver) in receivers.iter().enumerate() {
            let offset = Duration::seconds(step.saturating_mul(i64::try_from(i).unwrap_or(i64::MAX)));
            let run_at = now + initial + offset;

            let args = serde_json::to_value(ScheduledNotification {
                workflow_id: dispatch.workflow.id,
                event: dispatch.event.clone(),
                receiver: receiver.clone(),
            })?;
            let receiver_user = self.receiver_user(receiver).await;
            let message = self.ctx.renderer.render(
                &dispatch.workflow.content,
                &self.render_context(dispatch, receiver, receiver_user.as_ref(), author.as_ref()),
            );

            let task = self.ctx.queue.schedule_single(SEND_NOTIFICATION_HOOK, &args, run_at).await?;

            let mut entry = new_entry(dispatch, config.site.id, LogStatus::Scheduled, now);
            set_receiver(&mut entry, receiver);
            entry.subject = Some(message.subject);
            entry.is_async = true;
            entry.cron_task_id = Some(task.id.clone());
            if let Err(e) = log.record(&entry).await {
                // A task without its log row could never be listed or deleted.
                if let Err(unschedule) = self.ctx.queue.unschedule(&task.id).await {
                    warn!(task_id = %task.id, error = %unschedule, "cannot unschedule task after failed log write");
                }
                return Err(e);
            }

            debug!(task_id = %task.id, %run_at, receiver = %receiver.address, "delivery scheduled");
        }

        Ok(receivers.len())
    }

    async fn deliver(
        &self,
        dispatch: &DispatchContext,
        receiver: &Receiver,
        author: Option<&User>,
        is_async: bool,
    ) -> Attempt {
        let receiver_user = self.receiver_user(receiver).await;
        let message = self.ctx.renderer.render(
            &dispatch.workflow.content,
            &self.render_context(dispatch, receiver, receiver_user.as_ref(), author),
        );

        let Some(channel) = self.ctx.channel(&receiver.channel) else {
            warn!(channel = %receiver.channel, "channel not registered");
            return Attempt { subject: message.subject, error: Some("channel not registered".into()) };
        };

        let delivery = DeliveryContext {
            workflow_id: dispatch.workflow.id,
            post_id: dispatch.post_id(),
            event: dispatch.event.name().to_owned(),
            is_async,
        };
        let error = match channel.deliver(&receiver.recipient(), &message, &delivery).await {
            Ok(()) => None,
            Err(e) => {
                warn!(receiver = %receiver.address, channel = %receiver.channel, "delivery failed: {e}");
                Some(e.to_string())
            }
        };
        Attempt { subject: message.subject, error }
    }

    fn render_context<'a>(
        &'a self,
        dispatch: &'a DispatchContext,
        receiver: &'a Receiver,
        receiver_user: Option<&'a User>,
        author: Option<&'a User>,
    ) -> RenderContext<'a> {
        RenderContext {
            dispatch,
            receiver: Some(receiver),
            receiver_user,
            post_author: author,
            site: &self.ctx.config.site,
        }
    }

    async fn post_author(&self, dispatch: &DispatchContext) -> Option<User> {
        let post = dispatch.post.as_ref()?;
        self.ctx.directory.user(post.author_id).await
    }

    async fn receiver_user(&self, receiver: &Receiver) -> Option<User> {
        self.ctx.directory.user(receiver.user_id()?).await
    }

    /// Run one deferred delivery: drop its `scheduled` row and append the
    /// outcome.
    pub async fn run_scheduled(&self, task_id: &str, job: ScheduledNotification) -> Result<LogStatus, EngineError> {
        let workflow = match WorkflowStore::new(&self.ctx.pool).get(job.workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                log_repo::delete_by_task(&self.ctx.pool, task_id).await?;
                return Err(e);
            }
        };

        let dispatch = DispatchContext::load(&self.ctx, &job.event, workflow).await;
        let author = self.post_author(&dispatch).await;
        let attempt = self.deliver(&dispatch, &job.receiver, author.as_ref(), true).await;
        let status = if attempt.error.is_none() { LogStatus::Success } else { LogStatus::Error };

        log_repo::delete_by_task(&self.ctx.pool, task_id).await?;

        let mut entry = new_entry(&dispatch, self.ctx.config.site.id, status, self.ctx.clock.now());
        set_receiver(&mut entry, &job.receiver);
        entry.subject = Some(attempt.subject);
        entry.error = attempt.error;
        entry.is_async = true;
        NotificationLog::new(self.ctx.clone()).record(&entry).await?;

        Ok(status)
    }
}

struct Attempt {
    subject: String,
    error: Option<String>,
}

/// Runs `planner_send_notification` tasks from the cron runner.
pub struct SendNotificationHandler {
    dispatcher: Dispatcher,
}

impl SendNotificationHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { dispatcher: Dispatcher::new(ctx) }
    }
}

#[async_trait]
impl TaskHandler for SendNotificationHandler {
    async fn handle(&self, task: &ScheduledTask) -> Result<(), QueueError> {
        let job: ScheduledNotification =
            serde_json::from_value(task.args.clone()).map_err(|e| QueueError::InvalidArgs {
                task_id: task.id.clone(),
                message: e.to_string(),
            })?;

        match self.dispatcher.run_scheduled(&task.id, job).await {
            Ok(LogStatus::Error) => Err(QueueError::Handler {
                task_id: task.id.clone(),
                message: "delivery failed".into(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(QueueError::Handler { task_id: task.id.clone(), message: e.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use channels::mock::MockChannel;
    use channels::Channel;
    use db::models::LogFilter;
    use queue::CronRunner;

    use super::*;
    use crate::clock::Clock;
    use crate::config::NotificationsConfig;
    use crate::fixtures::{self, Harness};
    use crate::log::LogQuery;
    use crate::models::{EventKind, MessageTemplate, WorkflowDraft, WorkflowStatus};

    async fn published(h: &Harness) -> crate::models::Workflow {
        WorkflowStore::new(&h.ctx.pool)
            .create(&WorkflowDraft {
                title: "Published".into(),
                status: WorkflowStatus::Publish,
                events: BTreeSet::from([EventKind::StatusTransition]),
                content: MessageTemplate {
                    subject: "[psppno_post] is live".into(),
                    body: "Hi [psppno_receiver]".into(),
                },
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn dispatch(h: &Harness) -> DispatchContext {
        h.add_user(fixtures::user(2, "author", &["author"]));
        h.add_post(fixtures::post(10, 2));
        let workflow = published(h).await;
        let event = EventDescriptor::status_transition(10, "draft", "publish", 3, 1, h.clock.now());
        DispatchContext::load(&h.ctx, &event, workflow).await
    }

    fn receiver(address: &str, channel: &str) -> Receiver {
        let mut r = Receiver::email(None, address.into(), "emails", None);
        r.channel = channel.into();
        r
    }

    async fn all_entries(h: &Harness) -> Vec<crate::log::LogView> {
        NotificationLog::new(h.ctx.clone()).list(&LogQuery::default()).await.unwrap().items
    }

    #[tokio::test]
    async fn sync_send_renders_and_logs_each_receiver() {
        let h = Harness::new().await;
        let ctx = dispatch(&h).await;
        let summary = Dispatcher::new(h.ctx.clone())
            .send_now(&ctx, &[receiver("a@example.com", "email"), receiver("b@example.com", "email")])
            .await
            .unwrap();

        assert_eq!(summary, SendSummary { sent: 2, failed: 0 });
        assert_eq!(h.email.addresses(), vec!["a@example.com", "b@example.com"]);
        let delivered = h.email.recorded();
        assert_eq!(delivered[0].message.subject, "Post 10 is live");
        assert_eq!(delivered[0].message.body, "Hi a@example.com");
        assert!(!delivered[0].ctx.is_async);

        let rows = all_entries(&h).await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.entry.status == LogStatus::Success && r.entry.success));
    }

    #[tokio::test]
    async fn transport_errors_and_unknown_channels_become_error_rows() {
        let failing: Arc<dyn Channel> = Arc::new(MockChannel::failing("email", "smtp down"));
        let h = Harness::build(NotificationsConfig::default(), |b| b.channel(failing)).await;
        let ctx = dispatch(&h).await;

        let summary = Dispatcher::new(h.ctx.clone())
            .send_now(&ctx, &[receiver("a@example.com", "email"), receiver("b@example.com", "pigeon")])
            .await
            .unwrap();
        assert_eq!(summary, SendSummary { sent: 0, failed: 2 });

        let mut errors: Vec<String> = all_entries(&h)
            .await
            .into_iter()
            .map(|r| r.entry.error.unwrap_or_default())
            .collect();
        errors.sort();
        assert_eq!(errors, vec!["channel not registered", "transport error: smtp down"]);
    }

    #[tokio::test]
    async fn scheduling_spreads_tasks_and_links_rows() {
        let config = NotificationsConfig { cron_initial_delay_secs: 60, cron_offset_step_secs: 5, ..Default::default() };
        let h = Harness::with_config(config).await;
        let ctx = dispatch(&h).await;
        let now = h.clock.now();

        let count = Dispatcher::new(h.ctx.clone())
            .schedule(&ctx, &[receiver("a@example.com", "email"), receiver("b@example.com", "email")])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(h.email.call_count(), 0);

        let mut rows = all_entries(&h).await;
        rows.sort_by_key(|r| r.entry.id);
        assert_eq!(rows.len(), 2);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.entry.status, LogStatus::Scheduled);
            assert!(row.entry.is_async);
            let task_id = row.entry.cron_task_id.as_deref().unwrap();
            let task = h.ctx.queue.find(task_id).await.unwrap().unwrap();
            assert_eq!(task.hook, SEND_NOTIFICATION_HOOK);
            assert_eq!(task.run_at, now + Duration::seconds(60 + 5 * i as i64));
        }
    }

    #[tokio::test]
    async fn failed_log_write_leaves_no_task_behind() {
        let h = Harness::new().await;
        let ctx = dispatch(&h).await;
        sqlx::query("DROP TABLE notification_log").execute(&h.ctx.pool).await.unwrap();

        let result = Dispatcher::new(h.ctx.clone())
            .schedule(&ctx, &[receiver("a@example.com", "email")])
            .await;
        assert!(matches!(result, Err(EngineError::Database(_))));
        assert_eq!(h.ctx.queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cron_run_replaces_scheduled_rows_with_outcomes() {
        let h = Harness::new().await;
        let ctx = dispatch(&h).await;
        Dispatcher::new(h.ctx.clone())
            .schedule(&ctx, &[receiver("a@example.com", "email")])
            .await
            .unwrap();

        let mut runner = CronRunner::new(h.ctx.queue.clone());
        runner.register(SEND_NOTIFICATION_HOOK, Arc::new(SendNotificationHandler::new(h.ctx.clone())));
        h.clock.advance(Duration::minutes(1));
        let summary = runner.run_due(h.clock.now()).await.unwrap();
        assert_eq!(summary.completed, 1);

        assert_eq!(h.email.call_count(), 1);
        assert!(h.email.recorded()[0].ctx.is_async);
        let rows = all_entries(&h).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.status, LogStatus::Success);
        assert!(rows[0].entry.is_async);

        let scheduled = LogFilter { status: Some(LogStatus::Scheduled), ..Default::default() };
        assert_eq!(db::repository::notification_log::count_entries(&h.ctx.pool, &scheduled).await.unwrap(), 0);
    }
}
