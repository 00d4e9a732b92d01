//! Workflow persistence with validation.

use tracing::info;

use db::repository::workflows as workflow_repo;
use db::{DbError, DbPool};

use crate::context::ChannelRegistry;
use crate::filters::validate_workflow;
use crate::models::{EventKind, Workflow, WorkflowDraft, WorkflowId, WorkflowStatus};
use crate::EngineError;

pub struct WorkflowStore<'a> {
    pool: &'a DbPool,
    channels: Option<&'a ChannelRegistry>,
}

impl<'a> WorkflowStore<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool, channels: None }
    }

    /// Also check enabled channels against `channels` when validating.
    pub fn with_channels(mut self, channels: &'a ChannelRegistry) -> Self {
        self.channels = Some(channels);
        self
    }

    pub async fn create(&self, draft: &WorkflowDraft) -> Result<Workflow, EngineError> {
        validate_workflow(draft, self.channels)?;
        let row = workflow_repo::create_workflow(self.pool, &draft.to_write()?).await?;
        info!(workflow_id = row.id, title = %row.title, "workflow created");
        Workflow::try_from(row)
    }

    pub async fn update(&self, id: WorkflowId, draft: &WorkflowDraft) -> Result<Workflow, EngineError> {
        validate_workflow(draft, self.channels)?;
        let row = workflow_repo::update_workflow(self.pool, id, &draft.to_write()?)
            .await
            .map_err(|e| not_found(e, id))?;
        Workflow::try_from(row)
    }

    pub async fn get(&self, id: WorkflowId) -> Result<Workflow, EngineError> {
        let row = workflow_repo::get_workflow(self.pool, id).await.map_err(|e| not_found(e, id))?;
        Workflow::try_from(row)
    }

    pub async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, EngineError> {
        workflow_repo::list_workflows(self.pool, status.as_ref().map(WorkflowStatus::as_str))
            .await?
            .into_iter()
            .map(Workflow::try_from)
            .collect()
    }

    /// Published workflows listening to `kind`, in id order.
    pub async fn published_for(&self, kind: EventKind) -> Result<Vec<Workflow>, EngineError> {
        workflow_repo::list_published_by_event(self.pool, kind.key())
            .await?
            .into_iter()
            .map(Workflow::try_from)
            .collect()
    }

    /// Soft delete.
    pub async fn trash(&self, id: WorkflowId) -> Result<(), EngineError> {
        self.set_status(id, WorkflowStatus::Trash).await
    }

    /// Bring a trashed workflow back as a draft.
    pub async fn restore(&self, id: WorkflowId) -> Result<(), EngineError> {
        self.set_status(id, WorkflowStatus::Draft).await
    }

    pub async fn set_status(&self, id: WorkflowId, status: WorkflowStatus) -> Result<(), EngineError> {
        workflow_repo::set_workflow_status(self.pool, id, status.as_str())
            .await
            .map_err(|e| not_found(e, id))
    }

    /// Permanent delete.
    pub async fn delete(&self, id: WorkflowId) -> Result<(), EngineError> {
        workflow_repo::delete_workflow(self.pool, id).await.map_err(|e| not_found(e, id))?;
        info!(workflow_id = id, "workflow deleted");
        Ok(())
    }
}

fn not_found(err: DbError, id: WorkflowId) -> EngineError {
    match err {
        DbError::NotFound => EngineError::WorkflowNotFound(id),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::{ContentFilters, ReceiverSpec};

    fn draft(title: &str, status: WorkflowStatus, events: &[EventKind]) -> WorkflowDraft {
        WorkflowDraft {
            title: title.into(),
            status,
            events: events.iter().copied().collect::<BTreeSet<_>>(),
            filters: ContentFilters { status_to: vec!["publish".into()], ..Default::default() },
            receivers: ReceiverSpec { author: true, ..Default::default() },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_reload_preserves_settings() {
        let pool = db::pool::create_memory_pool().await.unwrap();
        let store = WorkflowStore::new(&pool);
        let created = store
            .create(&draft("Published", WorkflowStatus::Publish, &[EventKind::StatusTransition]))
            .await
            .unwrap();
        let loaded = store.get(created.id).await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.filters.status_to, vec!["publish"]);
        assert!(loaded.receivers.author);
    }

    #[tokio::test]
    async fn only_published_workflows_listening_to_the_event_are_returned() {
        let pool = db::pool::create_memory_pool().await.unwrap();
        let store = WorkflowStore::new(&pool);
        let a = store.create(&draft("a", WorkflowStatus::Publish, &[EventKind::StatusTransition])).await.unwrap();
        store.create(&draft("b", WorkflowStatus::Draft, &[EventKind::StatusTransition])).await.unwrap();
        let c = store
            .create(&draft("c", WorkflowStatus::Publish, &[EventKind::PostUpdate, EventKind::StatusTransition]))
            .await
            .unwrap();

        let ids: Vec<_> = store.published_for(EventKind::StatusTransition).await.unwrap().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        let ids: Vec<_> = store.published_for(EventKind::PostUpdate).await.unwrap().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![c.id]);

        store.trash(a.id).await.unwrap();
        assert_eq!(store.published_for(EventKind::StatusTransition).await.unwrap().len(), 1);
        store.restore(a.id).await.unwrap();
        assert_eq!(store.get(a.id).await.unwrap().status, WorkflowStatus::Draft);
    }

    #[tokio::test]
    async fn update_reindexes_events() {
        let pool = db::pool::create_memory_pool().await.unwrap();
        let store = WorkflowStore::new(&pool);
        let wf = store.create(&draft("a", WorkflowStatus::Publish, &[EventKind::StatusTransition])).await.unwrap();

        let mut changed = wf.to_draft();
        changed.events = BTreeSet::from([EventKind::EditorialComment]);
        store.update(wf.id, &changed).await.unwrap();

        assert!(store.published_for(EventKind::StatusTransition).await.unwrap().is_empty());
        assert_eq!(store.published_for(EventKind::EditorialComment).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_and_missing_workflows_are_reported() {
        let pool = db::pool::create_memory_pool().await.unwrap();
        let store = WorkflowStore::new(&pool);
        assert!(matches!(
            store.create(&draft("", WorkflowStatus::Publish, &[EventKind::PostUpdate])).await,
            Err(EngineError::InvalidWorkflow(_))
        ));
        assert!(matches!(store.get(42).await, Err(EngineError::WorkflowNotFound(42))));
        assert!(matches!(store.delete(42).await, Err(EngineError::WorkflowNotFound(42))));
        assert!(matches!(store.trash(42).await, Err(EngineError::WorkflowNotFound(42))));
    }
}
