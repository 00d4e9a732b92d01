//! Notification log service.
//!
//! Wraps the append-only `notification_log` table with the operator-facing
//! behaviour: display status computation, filtered pagination, deletion that
//! cancels the linked task, and the "try again" reschedule action.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use db::models::{LogEntryRow, LogFilter, LogStatus, NewLogEntry, SortOrder};
use db::repository::notification_log as log_repo;
use db::DbError;

use crate::context::{AppContext, DispatchContext};
use crate::controller::{TriggerOptions, TriggerReport, WorkflowController};
use crate::events::EventDescriptor;
use crate::models::EventKind;
use crate::receivers::Receiver;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub post_id: i64,
    pub site_id: i64,
    pub workflow_id: i64,
    pub actor_id: i64,
    pub event: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub channel: Option<String>,
    pub receiver: Option<String>,
    pub receiver_group: Option<String>,
    pub receiver_subgroup: Option<String>,
    pub subject: Option<String>,
    pub status: LogStatus,
    pub success: bool,
    pub error: Option<String>,
    pub is_async: bool,
    pub comment_id: Option<i64>,
    pub event_args: Value,
    pub cron_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LogEntryRow> for LogEntry {
    type Error = EngineError;

    fn try_from(row: LogEntryRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<LogStatus>()
            .map_err(|e| EngineError::Corrupt(format!("log entry {}: {e}", row.id)))?;
        // Argument bags are recorded verbatim, even when malformed.
        let event_args = serde_json::from_str(&row.event_args).unwrap_or(Value::String(row.event_args));

        Ok(Self {
            id: row.id,
            post_id: row.post_id,
            site_id: row.site_id,
            workflow_id: row.workflow_id,
            actor_id: row.actor_id,
            event: row.event,
            old_status: row.old_status,
            new_status: row.new_status,
            channel: row.channel,
            receiver: row.receiver,
            receiver_group: row.receiver_group,
            receiver_subgroup: row.receiver_subgroup,
            subject: row.subject,
            status,
            success: row.success,
            error: row.error,
            is_async: row.is_async,
            comment_id: row.comment_id,
            event_args,
            cron_task_id: row.cron_task_id,
            created_at: row.created_at,
        })
    }
}

/// A new row describing one decision about `ctx`.
pub(crate) fn new_entry(ctx: &DispatchContext, site_id: i64, status: LogStatus, at: DateTime<Utc>) -> NewLogEntry {
    let event = &ctx.event;
    NewLogEntry {
        post_id: ctx.post_id(),
        site_id: event.site_id().unwrap_or(site_id),
        workflow_id: ctx.workflow.id,
        actor_id: event.actor_id,
        event: event.name().to_owned(),
        old_status: event.old_status().map(str::to_owned),
        new_status: event.new_status().map(str::to_owned),
        channel: None,
        receiver: None,
        receiver_group: None,
        receiver_subgroup: None,
        subject: None,
        status,
        error: None,
        is_async: false,
        comment_id: event.comment_id(),
        event_args: event.args.to_string(),
        cron_task_id: None,
        created_at: at,
    }
}

pub(crate) fn set_receiver(entry: &mut NewLogEntry, receiver: &Receiver) {
    entry.channel = Some(receiver.channel.clone());
    entry.receiver = Some(receiver.log_key());
    entry.receiver_group = Some(receiver.group.clone());
    entry.receiver_subgroup = receiver.subgroup.clone();
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Status as presented to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayStatus {
    Sent,
    Failed { message: String },
    Skipped { reason: String },
    Scheduled { run_at: DateTime<Utc> },
    /// The task should already have run.
    ScheduledLate { run_at: DateTime<Utc> },
    ScheduledTaskMissing,
}

impl DisplayStatus {
    pub fn label(&self) -> String {
        match self {
            Self::Sent => "Sent".into(),
            Self::Failed { message } if message.is_empty() => "Failed".into(),
            Self::Failed { message } => format!("Failed: {message}"),
            Self::Skipped { reason } if reason.is_empty() => "Skipped".into(),
            Self::Skipped { reason } => format!("Skipped: {reason}"),
            Self::Scheduled { run_at } => format!("Scheduled for {}", run_at.format("%Y-%m-%d %H:%M:%S UTC")),
            Self::ScheduledLate { run_at } => {
                format!("Scheduled, but late (was due {})", run_at.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            Self::ScheduledTaskMissing => "Scheduled, but the cron task is not found".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogView {
    #[serde(flatten)]
    pub entry: LogEntry,
    pub display_status: DisplayStatus,
    pub status_label: String,
    /// Set when the row was recorded for another site of the network.
    pub origin_site: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub filter: LogFilter,
    pub order: SortOrder,
    /// 1-based.
    pub page: u32,
    /// Falls back to the configured page size.
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub items: Vec<LogView>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

/// Outcome of a bulk reschedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RescheduleReport {
    pub rescheduled: Vec<i64>,
    /// Rows whose status cannot be rescheduled.
    pub ignored: Vec<i64>,
    pub missing: Vec<i64>,
    pub outcome: TriggerReport,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct NotificationLog {
    ctx: Arc<AppContext>,
}

impl NotificationLog {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn record(&self, entry: &NewLogEntry) -> Result<LogEntry, EngineError> {
        let row = log_repo::insert_entry(&self.ctx.pool, entry).await?;
        LogEntry::try_from(row)
    }

    pub async fn get(&self, id: i64) -> Result<LogEntry, EngineError> {
        match log_repo::get_entry(&self.ctx.pool, id).await {
            Ok(row) => LogEntry::try_from(row),
            Err(DbError::NotFound) => Err(EngineError::LogEntryNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn view(&self, entry: LogEntry) -> Result<LogView, EngineError> {
        let display_status = self.display_status(&entry).await?;
        let current_site = self.ctx.config.site.id;
        Ok(LogView {
            origin_site: (entry.site_id != current_site).then_some(entry.site_id),
            status_label: display_status.label(),
            display_status,
            entry,
        })
    }

    async fn display_status(&self, entry: &LogEntry) -> Result<DisplayStatus, EngineError> {
        let status = match entry.status {
            LogStatus::Success => DisplayStatus::Sent,
            LogStatus::Error => DisplayStatus::Failed { message: entry.error.clone().unwrap_or_default() },
            LogStatus::Skipped => DisplayStatus::Skipped { reason: entry.error.clone().unwrap_or_default() },
            LogStatus::Scheduled => {
                let task = match &entry.cron_task_id {
                    Some(task_id) => self.ctx.queue.find(task_id).await?,
                    None => None,
                };
                match task {
                    None => DisplayStatus::ScheduledTaskMissing,
                    Some(task) if task.run_at < self.ctx.clock.now() => {
                        DisplayStatus::ScheduledLate { run_at: task.run_at }
                    }
                    Some(task) => DisplayStatus::Scheduled { run_at: task.run_at },
                }
            }
        };
        Ok(status)
    }

    pub async fn list(&self, query: &LogQuery) -> Result<LogPage, EngineError> {
        let per_page = query.per_page.unwrap_or(self.ctx.config.log_per_page).max(1);
        let page = query.page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let total = log_repo::count_entries(&self.ctx.pool, &query.filter).await?;
        let rows =
            log_repo::list_entries(&self.ctx.pool, &query.filter, query.order, i64::from(per_page), offset).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.view(LogEntry::try_from(row)?).await?);
        }

        let total_pages = u32::try_from((total + i64::from(per_page) - 1) / i64::from(per_page)).unwrap_or(u32::MAX);
        Ok(LogPage { items, total, page, per_page, total_pages })
    }

    /// Delete one row and cancel its task.
    pub async fn delete(&self, id: i64) -> Result<(), EngineError> {
        let entry = self.get(id).await?;
        if let Some(task_id) = &entry.cron_task_id {
            self.ctx.queue.unschedule(task_id).await?;
        }
        log_repo::delete_entry(&self.ctx.pool, id).await?;
        Ok(())
    }

    /// Delete every row matching `filter`, regardless of pagination, and
    /// cancel their tasks.  Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn delete_all(&self, filter: &LogFilter) -> Result<u64, EngineError> {
        for task_id in log_repo::task_ids_matching(&self.ctx.pool, filter).await? {
            self.ctx.queue.unschedule(&task_id).await?;
        }
        let removed = log_repo::delete_matching(&self.ctx.pool, filter).await?;
        info!("deleted {removed} log entries");
        Ok(removed)
    }

    /// Cancel, delete and re-run `scheduled` and `error` rows, bypassing
    /// duplicate suppression.  Other rows are left alone.
    #[instrument(skip(self))]
    pub async fn reschedule(&self, ids: &[i64]) -> Result<RescheduleReport, EngineError> {
        let controller = WorkflowController::new(self.ctx.clone());
        let mut report = RescheduleReport::default();

        for &id in ids {
            let entry = match self.get(id).await {
                Ok(entry) => entry,
                Err(EngineError::LogEntryNotFound(_)) => {
                    report.missing.push(id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !matches!(entry.status, LogStatus::Scheduled | LogStatus::Error) {
                report.ignored.push(id);
                continue;
            }
            let Some(kind) = EventKind::from_name(&entry.event) else {
                warn!(log_id = id, event = %entry.event, "cannot reschedule unknown event");
                report.ignored.push(id);
                continue;
            };

            if let Some(task_id) = &entry.cron_task_id {
                self.ctx.queue.unschedule(task_id).await?;
            }
            log_repo::delete_entry(&self.ctx.pool, id).await?;

            let event = EventDescriptor::new(kind, entry.actor_id, entry.event_args, self.ctx.clock.now());
            let options = TriggerOptions {
                ignore_duplicates: true,
                only_workflow: Some(entry.workflow_id),
                only_receiver: entry.receiver,
            };
            let outcome = controller.trigger(&event, &options).await?;
            report.outcome.merge(&outcome);
            report.rescheduled.push(id);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::clock::Clock;
    use crate::fixtures::{self, Harness};
    use crate::models::WorkflowDraft;

    fn ctx() -> DispatchContext {
        DispatchContext {
            event: EventDescriptor::status_transition(10, "draft", "publish", 3, 1, fixtures::start_time()),
            workflow: fixtures::workflow(
                1,
                WorkflowDraft {
                    title: "w".into(),
                    events: BTreeSet::from([EventKind::StatusTransition]),
                    ..Default::default()
                },
            ),
            post: Some(fixtures::post(10, 2)),
            actor: None,
            comment: None,
        }
    }

    async fn record(h: &Harness, status: LogStatus, at: DateTime<Utc>) -> LogEntry {
        let mut entry = new_entry(&ctx(), 1, status, at);
        entry.receiver = Some("someone@example.com".into());
        NotificationLog::new(h.ctx.clone()).record(&entry).await.unwrap()
    }

    #[tokio::test]
    async fn scheduled_rows_report_task_state() {
        let h = Harness::new().await;
        let log = NotificationLog::new(h.ctx.clone());
        let now = h.clock.now();

        let task = h.ctx.queue.schedule_single("planner_send_notification", &json!({}), now + Duration::minutes(5)).await.unwrap();
        let mut entry = new_entry(&ctx(), 1, LogStatus::Scheduled, now);
        entry.cron_task_id = Some(task.id.clone());
        let scheduled = log.record(&entry).await.unwrap();

        let view = log.view(scheduled.clone()).await.unwrap();
        assert_eq!(view.display_status, DisplayStatus::Scheduled { run_at: task.run_at });

        h.clock.advance(Duration::minutes(10));
        let view = log.view(scheduled.clone()).await.unwrap();
        assert_eq!(view.display_status, DisplayStatus::ScheduledLate { run_at: task.run_at });

        // Removed behind the log's back.
        h.ctx.queue.unschedule(&task.id).await.unwrap();
        let view = log.view(scheduled).await.unwrap();
        assert_eq!(view.display_status, DisplayStatus::ScheduledTaskMissing);
        assert_eq!(view.status_label, "Scheduled, but the cron task is not found");
    }

    #[tokio::test]
    async fn other_sites_are_flagged() {
        let h = Harness::new().await;
        let log = NotificationLog::new(h.ctx.clone());
        let mut entry = new_entry(&ctx(), 1, LogStatus::Success, h.clock.now());
        entry.site_id = 4;
        let recorded = log.record(&entry).await.unwrap();
        assert_eq!(log.view(recorded).await.unwrap().origin_site, Some(4));

        let local = record(&h, LogStatus::Success, h.clock.now()).await;
        assert_eq!(log.view(local).await.unwrap().origin_site, None);
    }

    #[tokio::test]
    async fn listing_paginates_and_orders_by_date() {
        let h = Harness::new().await;
        let start = h.clock.now();
        for i in 0..5 {
            record(&h, LogStatus::Success, start + Duration::minutes(i)).await;
        }
        let log = NotificationLog::new(h.ctx.clone());

        let page = log
            .list(&LogQuery { page: 2, per_page: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].entry.created_at, start + Duration::minutes(2));

        let oldest_first = log
            .list(&LogQuery { order: SortOrder::Asc, per_page: Some(1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(oldest_first.items[0].entry.created_at, start);
        assert_eq!(oldest_first.page, 1);
    }

    #[tokio::test]
    async fn delete_cancels_the_linked_task() {
        let h = Harness::new().await;
        let log = NotificationLog::new(h.ctx.clone());
        let task = h.ctx.queue.schedule_single("planner_send_notification", &json!({}), h.clock.now()).await.unwrap();
        let mut entry = new_entry(&ctx(), 1, LogStatus::Scheduled, h.clock.now());
        entry.cron_task_id = Some(task.id.clone());
        let recorded = log.record(&entry).await.unwrap();

        log.delete(recorded.id).await.unwrap();
        assert!(h.ctx.queue.find(&task.id).await.unwrap().is_none());
        assert!(matches!(log.get(recorded.id).await, Err(EngineError::LogEntryNotFound(_))));
    }

    #[tokio::test]
    async fn delete_all_honours_the_filter() {
        let h = Harness::new().await;
        let now = h.clock.now();
        record(&h, LogStatus::Success, now).await;
        record(&h, LogStatus::Error, now).await;
        record(&h, LogStatus::Error, now).await;
        record(&h, LogStatus::Skipped, now).await;

        let log = NotificationLog::new(h.ctx.clone());
        let filter = LogFilter { status: Some(LogStatus::Error), ..Default::default() };
        assert_eq!(log.delete_all(&filter).await.unwrap(), 2);

        let remaining = log.list(&LogQuery::default()).await.unwrap();
        assert_eq!(remaining.total, 2);
        assert!(remaining.items.iter().all(|v| v.entry.status != LogStatus::Error));
    }

    #[tokio::test]
    async fn reschedule_ignores_sent_and_skipped_rows() {
        let h = Harness::new().await;
        let sent = record(&h, LogStatus::Success, h.clock.now()).await;
        let skipped = record(&h, LogStatus::Skipped, h.clock.now()).await;

        let report = NotificationLog::new(h.ctx.clone())
            .reschedule(&[sent.id, skipped.id, 999])
            .await
            .unwrap();
        assert_eq!(report.ignored, vec![sent.id, skipped.id]);
        assert_eq!(report.missing, vec![999]);
        assert!(report.rescheduled.is_empty());
    }
}
