//! Workflow controller.
//!
//! For each event the controller:
//! 1. Loads the published workflows that selected the event.
//! 2. Consults the policy chain (a `Drop` verdict ends here silently).
//! 3. Evaluates the workflow's content filters.
//! 4. Suppresses duplicates inside the configured window.
//! 5. Resolves receivers.
//! 6. Schedules, sends, or records why it did neither.
//!
//! A failure inside one workflow is logged and does not stop the others.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use db::models::LogStatus;
use db::repository::notification_log as log_repo;

use crate::context::{AppContext, DispatchContext};
use crate::dispatcher::Dispatcher;
use crate::events::EventDescriptor;
use crate::filters;
use crate::log::{new_entry, NotificationLog};
use crate::models::{Workflow, WorkflowId};
use crate::policy::Verdict;
use crate::receivers::ReceiverResolver;
use crate::store::WorkflowStore;
use crate::EngineError;

pub const REASON_DUPLICATE: &str = "duplicate notification";
pub const REASON_NO_RECEIVERS: &str = "no receivers";

/// Knobs used by the reschedule path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    /// Skip the duplicate window check.
    pub ignore_duplicates: bool,
    /// Only consider this workflow.
    pub only_workflow: Option<WorkflowId>,
    /// Only deliver to the receiver with this log key.
    pub only_receiver: Option<String>,
}

/// Outcome counts of one trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReport {
    /// Workflows whose filters matched.
    pub matched: usize,
    pub sent: usize,
    pub failed: usize,
    pub scheduled: usize,
    pub skipped: usize,
    /// Workflows stopped by the duplicate window.
    pub suppressed: usize,
    /// Workflows dropped by a policy without a log row.
    pub dropped: usize,
}

impl TriggerReport {
    pub fn merge(&mut self, other: &TriggerReport) {
        self.matched += other.matched;
        self.sent += other.sent;
        self.failed += other.failed;
        self.scheduled += other.scheduled;
        self.skipped += other.skipped;
        self.suppressed += other.suppressed;
        self.dropped += other.dropped;
    }
}

enum Mode {
    Schedule,
    Send,
    Skip(String),
}

pub struct WorkflowController {
    ctx: Arc<AppContext>,
    dispatcher: Dispatcher,
}

impl WorkflowController {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { dispatcher: Dispatcher::new(ctx.clone()), ctx }
    }

    #[instrument(skip_all, fields(event = event.name(), post_id = event.post_id()))]
    pub async fn trigger(&self, event: &EventDescriptor, options: &TriggerOptions) -> Result<TriggerReport, EngineError> {
        let workflows = WorkflowStore::new(&self.ctx.pool).published_for(event.kind).await?;
        let mut report = TriggerReport::default();

        for workflow in workflows {
            if options.only_workflow.is_some_and(|id| id != workflow.id) {
                continue;
            }
            let workflow_id = workflow.id;
            if let Err(e) = self.run_workflow(event, workflow, options, &mut report).await {
                error!(workflow_id, "workflow failed: {e}");
            }
        }

        if report.matched > 0 {
            info!(
                "event handled: {} matched, {} sent, {} failed, {} scheduled, {} skipped, {} suppressed",
                report.matched, report.sent, report.failed, report.scheduled, report.skipped, report.suppressed
            );
        }
        Ok(report)
    }

    async fn run_workflow(
        &self,
        event: &EventDescriptor,
        workflow: Workflow,
        options: &TriggerOptions,
        report: &mut TriggerReport,
    ) -> Result<(), EngineError> {
        let dispatch = DispatchContext::load(&self.ctx, event, workflow).await;
        let workflow_id = dispatch.workflow.id;

        let mode = match self.decide(&dispatch) {
            Ok(mode) => mode,
            Err(reason) => {
                debug!(workflow_id, %reason, "dropped by policy");
                report.dropped += 1;
                return Ok(());
            }
        };

        if let Err(mismatch) = filters::check(&dispatch.workflow.filters, event, dispatch.post.as_ref()) {
            debug!(workflow_id, %mismatch, "filters do not match");
            return Ok(());
        }
        report.matched += 1;

        if !options.ignore_duplicates && self.is_duplicate(&dispatch).await? {
            debug!(workflow_id, "duplicate inside threshold, suppressing");
            self.record_skip(&dispatch, REASON_DUPLICATE).await?;
            report.suppressed += 1;
            return Ok(());
        }

        let mut receivers = ReceiverResolver::new(&self.ctx).resolve(&dispatch).await?;
        if let Some(only) = &options.only_receiver {
            let only = only.to_lowercase();
            receivers.retain(|r| r.log_key() == only);
        }
        if receivers.is_empty() {
            self.record_skip(&dispatch, REASON_NO_RECEIVERS).await?;
            report.skipped += 1;
            return Ok(());
        }

        match mode {
            Mode::Schedule => {
                report.scheduled += self.dispatcher.schedule(&dispatch, &receivers).await?;
            }
            Mode::Send => {
                let summary = self.dispatcher.send_now(&dispatch, &receivers).await?;
                report.sent += summary.sent;
                report.failed += summary.failed;
            }
            Mode::Skip(reason) => {
                self.record_skip(&dispatch, &reason).await?;
                report.skipped += 1;
            }
        }
        Ok(())
    }

    /// Scheduling wins when enabled and allowed; otherwise sending.  Any
    /// `Drop` verdict is returned as `Err`.
    fn decide(&self, dispatch: &DispatchContext) -> Result<Mode, String> {
        let policies = &self.ctx.policies;

        if self.ctx.config.use_cron {
            match policies.allow_schedule(dispatch) {
                Verdict::Continue => return Ok(Mode::Schedule),
                Verdict::Drop(reason) => return Err(reason),
                Verdict::Skip(_) => {}
            }
        }

        match policies.allow_send(dispatch) {
            Verdict::Continue => Ok(Mode::Send),
            Verdict::Skip(reason) => Ok(Mode::Skip(reason)),
            Verdict::Drop(reason) => Err(reason),
        }
    }

    async fn is_duplicate(&self, dispatch: &DispatchContext) -> Result<bool, EngineError> {
        let minutes = dispatch
            .workflow
            .duplicate_threshold_minutes
            .unwrap_or(self.ctx.config.duplicate_threshold_minutes);
        if minutes == 0 {
            return Ok(false);
        }
        let since = self.ctx.clock.now() - Duration::minutes(i64::from(minutes));
        // One save raises several events; any of them counts for the workflow.
        let found =
            log_repo::exists_recent_dispatch(&self.ctx.pool, dispatch.workflow.id, dispatch.post_id(), since)
                .await?;
        Ok(found)
    }

    async fn record_skip(&self, dispatch: &DispatchContext, reason: &str) -> Result<(), EngineError> {
        let mut entry = new_entry(dispatch, self.ctx.config.site.id, LogStatus::Skipped, self.ctx.clock.now());
        entry.channel = Some(self.ctx.config.default_channel.clone());
        entry.error = Some(reason.to_owned());
        NotificationLog::new(self.ctx.clone()).record(&entry).await?;
        Ok(())
    }
}
