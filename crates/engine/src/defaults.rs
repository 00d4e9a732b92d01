//! The workflows installed on first activation.

use std::collections::BTreeSet;

use tracing::info;

use db::repository::options as option_repo;
use db::DbPool;

use crate::models::{ContentFilters, EventKind, MessageTemplate, ReceiverSpec, WorkflowDraft, WorkflowStatus};
use crate::store::WorkflowStore;
use crate::EngineError;

/// Set once the defaults have been installed.
pub const DEFAULTS_SEEDED_OPTION: &str = "default_workflows_seeded";

/// Statuses a post can be in before it is published.
pub const UNPUBLISHED_STATUSES: [&str; 6] = ["new", "auto-draft", "draft", "pending", "future", "private"];

fn author_and_followers() -> ReceiverSpec {
    ReceiverSpec { author: true, followers: true, ..Default::default() }
}

fn default_draft(title: &str, event: EventKind, filters: ContentFilters, subject: &str, body: &str) -> WorkflowDraft {
    WorkflowDraft {
        title: title.into(),
        status: WorkflowStatus::Publish,
        events: BTreeSet::from([event]),
        filters,
        receivers: author_and_followers(),
        content: MessageTemplate { subject: subject.into(), body: body.into() },
        is_default: true,
        ..Default::default()
    }
}

pub fn default_workflows() -> Vec<WorkflowDraft> {
    vec![
        default_draft(
            "Notify when content is published",
            EventKind::StatusTransition,
            ContentFilters {
                status_from: UNPUBLISHED_STATUSES.iter().map(|s| s.to_string()).collect(),
                status_to: vec!["publish".into()],
                ..Default::default()
            },
            r#"[psppno_post fields="title"] was published"#,
            "[psppno_actor] published \"[psppno_post]\".\n\n[psppno_post fields=\"url\"]",
        ),
        default_draft(
            "Notify on editorial comments",
            EventKind::EditorialComment,
            ContentFilters::default(),
            "New editorial comment on \"[psppno_post]\"",
            "[psppno_edcomment fields=\"author\"] commented:\n\n[psppno_edcomment]\n\n[psppno_post fields=\"edit_link\"]",
        ),
        default_draft(
            "Notify when posts change status",
            EventKind::StatusTransition,
            ContentFilters::default(),
            "\"[psppno_post]\" changed status",
            "[psppno_actor] changed the status of \"[psppno_post]\" from \
             [psppno_post fields=\"old_status\"] to [psppno_post fields=\"new_status\"].",
        ),
        default_draft(
            "Notify when content is unpublished",
            EventKind::StatusTransition,
            ContentFilters { status_from: vec!["publish".into()], ..Default::default() },
            "\"[psppno_post]\" was unpublished",
            "[psppno_actor] unpublished \"[psppno_post]\"; it is now [psppno_post fields=\"new_status\"].",
        ),
    ]
}

/// Install the default workflows unless that already happened once.
///
/// Returns the number of workflows created.  Deleting the defaults later
/// does not bring them back.
pub async fn seed_default_workflows(pool: &DbPool) -> Result<usize, EngineError> {
    if option_repo::get_option(pool, DEFAULTS_SEEDED_OPTION).await?.is_some() {
        return Ok(0);
    }

    let store = WorkflowStore::new(pool);
    let drafts = default_workflows();
    for draft in &drafts {
        store.create(draft).await?;
    }
    option_repo::set_option(pool, DEFAULTS_SEEDED_OPTION, "1").await?;

    info!("seeded {} default workflows", drafts.len());
    Ok(drafts.len())
}
