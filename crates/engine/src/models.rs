//! Core domain models for the notification engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory.  The configuration part is serialised to the JSON `settings`
//! column of the `workflows` table; selected events are additionally
//! indexed in `workflow_events`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use db::models::{WorkflowRow, WorkflowWrite};

use crate::EngineError;

pub type PostId = i64;
pub type UserId = i64;
pub type WorkflowId = i64;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// The occurrences a workflow can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "Post_StatusTransition")]
    StatusTransition,
    #[serde(rename = "Post_Update")]
    PostUpdate,
    #[serde(rename = "Post_TaxonomyUpdate")]
    TaxonomyUpdate,
    #[serde(rename = "Editorial_Comment")]
    EditorialComment,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        Self::StatusTransition,
        Self::PostUpdate,
        Self::TaxonomyUpdate,
        Self::EditorialComment,
    ];

    /// Event name recorded in the log.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusTransition => "Post_StatusTransition",
            Self::PostUpdate => "Post_Update",
            Self::TaxonomyUpdate => "Post_TaxonomyUpdate",
            Self::EditorialComment => "Editorial_Comment",
        }
    }

    /// Selection key a workflow stores to listen to this event.
    pub fn key(&self) -> &'static str {
        match self {
            Self::StatusTransition => "_psppno_evtpostsave",
            Self::PostUpdate => "_psppno_evtpostupdate",
            Self::TaxonomyUpdate => "_psppno_evtposttaxonomyupdate",
            Self::EditorialComment => "_psppno_evteditcomment",
        }
    }

    /// Host hook the event is derived from.
    pub fn hook(&self) -> &'static str {
        match self {
            Self::StatusTransition => "transition_post_status",
            Self::PostUpdate => "post_updated",
            Self::TaxonomyUpdate => "set_object_terms",
            Self::EditorialComment => "editorial_comment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Publish,
    #[default]
    Draft,
    Trash,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Draft => "draft",
            Self::Trash => "trash",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(Self::Publish),
            "draft"   => Ok(Self::Draft),
            "trash"   => Ok(Self::Trash),
            other     => Err(format!("unknown workflow status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow configuration sections
// ---------------------------------------------------------------------------

/// Content filters.  An empty list places no restriction on its dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentFilters {
    pub post_types: Vec<String>,
    /// Category term ids; the post must carry at least one.
    pub categories: Vec<i64>,
    /// Taxonomies whose term changes count (taxonomy-update events only).
    pub taxonomies: Vec<String>,
    /// Previous statuses (status-transition events only).
    pub status_from: Vec<String>,
    /// New statuses (status-transition events only).
    pub status_to: Vec<String>,
}

/// Who receives a workflow's notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverSpec {
    pub author: bool,
    pub site_admin: bool,
    /// Users and roles subscribed to the post itself.
    pub followers: bool,
    pub users: Vec<UserId>,
    pub roles: Vec<String>,
    /// Literal addresses, optionally written as `Name / address`.
    pub emails: Vec<String>,
}

impl ReceiverSpec {
    pub fn is_empty(&self) -> bool {
        !self.author
            && !self.site_admin
            && !self.followers
            && self.users.is_empty()
            && self.roles.is_empty()
            && self.emails.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

/// Per-channel enable flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelPreferences(pub BTreeMap<String, bool>);

impl ChannelPreferences {
    pub fn only(channel: &str) -> Self {
        Self(BTreeMap::from([(channel.to_owned(), true)]))
    }

    /// Enabled channels in name order.
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|(_, on)| **on).map(|(name, _)| name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Workflow fields supplied by an author, before the store assigns an id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowDraft {
    pub title: String,
    pub status: WorkflowStatus,
    pub events: BTreeSet<EventKind>,
    pub filters: ContentFilters,
    pub receivers: ReceiverSpec,
    pub content: MessageTemplate,
    pub channels: ChannelPreferences,
    pub is_default: bool,
    /// Overrides the global duplicate window; `Some(0)` disables it.
    pub duplicate_threshold_minutes: Option<u32>,
}

/// The JSON document stored in `workflows.settings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredSettings {
    events: BTreeSet<EventKind>,
    filters: ContentFilters,
    receivers: ReceiverSpec,
    content: MessageTemplate,
    channels: ChannelPreferences,
    duplicate_threshold_minutes: Option<u32>,
}

/// A stored workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub title: String,
    pub status: WorkflowStatus,
    pub events: BTreeSet<EventKind>,
    pub filters: ContentFilters,
    pub receivers: ReceiverSpec,
    pub content: MessageTemplate,
    pub channels: ChannelPreferences,
    pub is_default: bool,
    pub duplicate_threshold_minutes: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn listens_to(&self, kind: EventKind) -> bool {
        self.events.contains(&kind)
    }

    pub fn is_published(&self) -> bool {
        self.status == WorkflowStatus::Publish
    }

    /// The editable part of this workflow.
    pub fn to_draft(&self) -> WorkflowDraft {
        WorkflowDraft {
            title: self.title.clone(),
            status: self.status,
            events: self.events.clone(),
            filters: self.filters.clone(),
            receivers: self.receivers.clone(),
            content: self.content.clone(),
            channels: self.channels.clone(),
            is_default: self.is_default,
            duplicate_threshold_minutes: self.duplicate_threshold_minutes,
        }
    }
}

impl WorkflowDraft {
    pub fn to_write(&self) -> Result<WorkflowWrite, EngineError> {
        let settings = StoredSettings {
            events: self.events.clone(),
            filters: self.filters.clone(),
            receivers: self.receivers.clone(),
            content: self.content.clone(),
            channels: self.channels.clone(),
            duplicate_threshold_minutes: self.duplicate_threshold_minutes,
        };
        Ok(WorkflowWrite {
            title: self.title.trim().to_owned(),
            status: self.status.as_str().to_owned(),
            settings: serde_json::to_string(&settings)?,
            is_default: self.is_default,
            event_keys: self.events.iter().map(|e| e.key().to_owned()).collect(),
        })
    }
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = EngineError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let settings: StoredSettings = serde_json::from_str(&row.settings)
            .map_err(|e| EngineError::Corrupt(format!("workflow {} settings: {e}", row.id)))?;
        let status = row
            .status
            .parse::<WorkflowStatus>()
            .map_err(|e| EngineError::Corrupt(format!("workflow {}: {e}", row.id)))?;

        Ok(Self {
            id: row.id,
            title: row.title,
            status,
            events: settings.events,
            filters: settings.filters,
            receivers: settings.receivers,
            content: settings.content,
            channels: settings.channels,
            is_default: row.is_default,
            duplicate_threshold_minutes: settings.duplicate_threshold_minutes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
