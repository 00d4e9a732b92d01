//! Workflow validation and content filter evaluation.

use std::fmt;

use crate::context::ChannelRegistry;
use crate::events::EventDescriptor;
use crate::host::Post;
use crate::models::{ContentFilters, EventKind, WorkflowDraft};
use crate::receivers::parse_email_entry;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Reject workflows that could never fire or deliver.
///
/// When `channels` is given, every enabled channel must be registered.
pub fn validate_workflow(draft: &WorkflowDraft, channels: Option<&ChannelRegistry>) -> Result<(), EngineError> {
    if draft.title.trim().is_empty() {
        return Err(EngineError::InvalidWorkflow("title must not be empty".into()));
    }

    if draft.events.is_empty() {
        return Err(EngineError::InvalidWorkflow("at least one event must be selected".into()));
    }

    for entry in &draft.receivers.emails {
        let (_, address) = parse_email_entry(entry);
        if !is_plausible_address(&address) {
            return Err(EngineError::InvalidWorkflow(format!("malformed e-mail receiver '{entry}'")));
        }
    }

    if let Some(registry) = channels {
        for name in draft.channels.enabled() {
            if !registry.contains_key(name) {
                return Err(EngineError::InvalidWorkflow(format!("unknown channel '{name}'")));
            }
        }
    }

    Ok(())
}

/// `local@domain` with no whitespace and a dot somewhere in the domain.
pub(crate) fn is_plausible_address(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    match address.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// The first filter dimension that rejected an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMismatch {
    PostType,
    Category,
    Taxonomy,
    StatusFrom,
    StatusTo,
}

impl fmt::Display for FilterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PostType => "post type",
            Self::Category => "category",
            Self::Taxonomy => "taxonomy",
            Self::StatusFrom => "previous status",
            Self::StatusTo => "new status",
        };
        f.write_str(s)
    }
}

/// Evaluate every configured dimension.  Empty dimensions always match;
/// taxonomy only applies to taxonomy updates and the status dimensions only
/// to status transitions.
pub fn check(filters: &ContentFilters, event: &EventDescriptor, post: Option<&Post>) -> Result<(), FilterMismatch> {
    if !filters.post_types.is_empty() {
        let matched = post.is_some_and(|p| filters.post_types.iter().any(|t| *t == p.post_type));
        if !matched {
            return Err(FilterMismatch::PostType);
        }
    }

    if !filters.categories.is_empty() {
        let matched = post.is_some_and(|p| p.category_ids().iter().any(|id| filters.categories.contains(id)));
        if !matched {
            return Err(FilterMismatch::Category);
        }
    }

    if event.kind == EventKind::TaxonomyUpdate && !filters.taxonomies.is_empty() {
        let matched = event.taxonomy().is_some_and(|t| filters.taxonomies.iter().any(|f| f == t));
        if !matched {
            return Err(FilterMismatch::Taxonomy);
        }
    }

    if event.kind == EventKind::StatusTransition {
        if !filters.status_from.is_empty() {
            let matched = event.old_status().is_some_and(|s| filters.status_from.iter().any(|f| f == s));
            if !matched {
                return Err(FilterMismatch::StatusFrom);
            }
        }
        if !filters.status_to.is_empty() {
            let matched = event.new_status().is_some_and(|s| filters.status_to.iter().any(|f| f == s));
            if !matched {
                return Err(FilterMismatch::StatusTo);
            }
        }
    }

    Ok(())
}

pub fn matches(filters: &ContentFilters, event: &EventDescriptor, post: Option<&Post>) -> bool {
    check(filters, event, post).is_ok()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    use chrono::Utc;

    use channels::mock::MockChannel;
    use channels::Channel;

    use super::*;
    use crate::fixtures;
    use crate::models::{ChannelPreferences, ReceiverSpec};

    fn transition(old: &str, new: &str) -> EventDescriptor {
        EventDescriptor::status_transition(10, old, new, 1, 1, Utc::now())
    }

    fn draft() -> WorkflowDraft {
        WorkflowDraft {
            title: "Published".into(),
            events: BTreeSet::from([EventKind::StatusTransition]),
            ..Default::default()
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let filters = ContentFilters::default();
        let post = fixtures::post(10, 2);
        assert!(matches(&filters, &transition("draft", "publish"), Some(&post)));
        assert!(matches(&filters, &transition("draft", "publish"), None));
    }

    #[test]
    fn status_dimensions_are_anded() {
        let filters = ContentFilters {
            status_from: vec!["draft".into(), "pending".into()],
            status_to: vec!["publish".into()],
            ..Default::default()
        };
        let post = fixtures::post(10, 2);
        assert!(matches(&filters, &transition("pending", "publish"), Some(&post)));
        assert_eq!(
            check(&filters, &transition("future", "publish"), Some(&post)),
            Err(FilterMismatch::StatusFrom)
        );
        assert_eq!(
            check(&filters, &transition("draft", "private"), Some(&post)),
            Err(FilterMismatch::StatusTo)
        );
    }

    #[test]
    fn status_filters_ignore_other_events() {
        let filters = ContentFilters { status_to: vec!["publish".into()], ..Default::default() };
        let update = EventDescriptor::post_update(10, "draft", 1, 1, Utc::now());
        assert!(matches(&filters, &update, Some(&fixtures::post(10, 2))));
    }

    #[test]
    fn post_type_and_category_need_a_post() {
        let filters = ContentFilters {
            post_types: vec!["page".into()],
            ..Default::default()
        };
        let event = transition("draft", "publish");
        assert_eq!(check(&filters, &event, None), Err(FilterMismatch::PostType));
        assert_eq!(
            check(&filters, &event, Some(&fixtures::post(10, 2))),
            Err(FilterMismatch::PostType)
        );

        let filters = ContentFilters { categories: vec![7, 8], ..Default::default() };
        let mut post = fixtures::post(10, 2);
        assert_eq!(check(&filters, &event, Some(&post)), Err(FilterMismatch::Category));
        fixtures::add_category(&mut post, 8, "News");
        assert!(matches(&filters, &event, Some(&post)));
    }

    #[test]
    fn taxonomy_filter_applies_to_term_updates_only() {
        let filters = ContentFilters { taxonomies: vec!["category".into()], ..Default::default() };
        let tags = EventDescriptor::taxonomy_update(10, "post_tag", &[1], &[], 1, 1, Utc::now());
        let cats = EventDescriptor::taxonomy_update(10, "category", &[1], &[], 1, 1, Utc::now());
        let post = fixtures::post(10, 2);
        assert_eq!(check(&filters, &tags, Some(&post)), Err(FilterMismatch::Taxonomy));
        assert!(matches(&filters, &cats, Some(&post)));
        assert!(matches(&filters, &transition("draft", "publish"), Some(&post)));
    }

    #[test]
    fn validation_rejects_unusable_workflows() {
        assert!(validate_workflow(&draft(), None).is_ok());

        let blank = WorkflowDraft { title: "   ".into(), ..draft() };
        assert!(matches!(validate_workflow(&blank, None), Err(EngineError::InvalidWorkflow(_))));

        let no_events = WorkflowDraft { events: BTreeSet::new(), ..draft() };
        assert!(validate_workflow(&no_events, None).is_err());

        let bad_email = WorkflowDraft {
            receivers: ReceiverSpec { emails: vec!["Editors / not-an-address".into()], ..Default::default() },
            ..draft()
        };
        assert!(validate_workflow(&bad_email, None).is_err());

        let good_email = WorkflowDraft {
            receivers: ReceiverSpec { emails: vec!["Editors / desk@example.com".into()], ..Default::default() },
            ..draft()
        };
        assert!(validate_workflow(&good_email, None).is_ok());
    }

    #[test]
    fn validation_checks_channels_against_registry() {
        let mut registry: ChannelRegistry = HashMap::new();
        let email: Arc<dyn Channel> = Arc::new(MockChannel::delivering("email"));
        registry.insert("email".into(), email);

        let known = WorkflowDraft { channels: ChannelPreferences::only("email"), ..draft() };
        assert!(validate_workflow(&known, Some(&registry)).is_ok());

        let unknown = WorkflowDraft { channels: ChannelPreferences::only("slack"), ..draft() };
        assert!(validate_workflow(&unknown, Some(&registry)).is_err());
        assert!(validate_workflow(&unknown, None).is_ok());
    }

    #[test]
    fn address_plausibility() {
        assert!(is_plausible_address("a@b.co"));
        assert!(!is_plausible_address("a@b"));
        assert!(!is_plausible_address("@b.co"));
        assert!(!is_plausible_address("a b@c.co"));
        assert!(!is_plausible_address(""));
    }
}
