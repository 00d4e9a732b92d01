//! Shortcode expansion for notification subjects and bodies.
//!
//! A template such as
//!
//! ```text
//! "[psppno_post fields=\"title,status\" separator=\" | \"]" was updated by [psppno_actor]
//! ```
//!
//! is rendered by looking each field up in one of five families (post,
//! actor, workflow, editorial comment, receiver).  Unknown fields render
//! empty and unknown shortcodes are left as written.

use std::sync::{Arc, LazyLock};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use tracing::warn;

use channels::OutboundMessage;

use crate::config::SiteConfig;
use crate::context::DispatchContext;
use crate::host::{User, CATEGORY_TAXONOMY};
use crate::models::MessageTemplate;
use crate::receivers::Receiver;

static SHORTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(psppno_post|psppno_actor|psppno_workflow|psppno_edcomment|psppno_receiver)((?:\s+[a-z_]+\s*=\s*(?:\x22[^\x22]*\x22|'[^']*'))*)\s*\]")
        .expect("shortcode pattern is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-z_]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute pattern is valid")
});

const DEFAULT_SEPARATOR: &str = ", ";
const DEFAULT_DATE_FORMAT: &str = "%B %-d, %Y";
const DEFAULT_TIME_FORMAT: &str = "%-I:%M %p";

/// Field families addressable from a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Post,
    Actor,
    Workflow,
    EditorialComment,
    Receiver,
}

impl Family {
    pub fn shortcode(&self) -> &'static str {
        match self {
            Self::Post => "psppno_post",
            Self::Actor => "psppno_actor",
            Self::Workflow => "psppno_workflow",
            Self::EditorialComment => "psppno_edcomment",
            Self::Receiver => "psppno_receiver",
        }
    }

    pub fn from_shortcode(tag: &str) -> Option<Self> {
        [Self::Post, Self::Actor, Self::Workflow, Self::EditorialComment, Self::Receiver]
            .into_iter()
            .find(|f| f.shortcode() == tag)
    }

    /// Field rendered when a shortcode names none.
    pub fn default_field(&self) -> &'static str {
        match self {
            Self::Post | Self::Workflow => "title",
            Self::Actor => "display_name",
            Self::EditorialComment => "content",
            Self::Receiver => "name",
        }
    }
}

/// Data available while rendering for one receiver.
pub struct RenderContext<'a> {
    pub dispatch: &'a DispatchContext,
    pub receiver: Option<&'a Receiver>,
    /// The receiver's user record, when the receiver is a user.
    pub receiver_user: Option<&'a User>,
    pub post_author: Option<&'a User>,
    pub site: &'a SiteConfig,
}

/// Adds fields to a family.  Consulted only for fields the renderer does
/// not know itself.
pub trait FieldExtension: Send + Sync {
    fn field(&self, family: Family, field: &str, ctx: &RenderContext<'_>) -> Option<String>;
}

pub struct ContentRenderer {
    date_format: String,
    time_format: String,
    extensions: Vec<Arc<dyn FieldExtension>>,
}

impl ContentRenderer {
    /// Invalid format strings fall back to the defaults.
    pub fn new(date_format: &str, time_format: &str) -> Self {
        Self {
            date_format: checked_format(date_format, DEFAULT_DATE_FORMAT),
            time_format: checked_format(time_format, DEFAULT_TIME_FORMAT),
            extensions: Vec::new(),
        }
    }

    pub fn add_extension(&mut self, extension: Arc<dyn FieldExtension>) {
        self.extensions.push(extension);
    }

    pub fn render(&self, template: &MessageTemplate, ctx: &RenderContext<'_>) -> OutboundMessage {
        OutboundMessage {
            subject: self.render_text(&template.subject, ctx),
            body: self.render_text(&template.body, ctx),
        }
    }

    pub fn render_text(&self, text: &str, ctx: &RenderContext<'_>) -> String {
        SHORTCODE
            .replace_all(text, |caps: &Captures<'_>| {
                let Some(family) = Family::from_shortcode(&caps[1]) else {
                    return caps[0].to_owned();
                };
                let attrs = caps.get(2).map_or("", |m| m.as_str());
                self.expand(family, attrs, ctx)
            })
            .into_owned()
    }

    fn expand(&self, family: Family, attrs: &str, ctx: &RenderContext<'_>) -> String {
        let mut fields = None;
        let mut separator = DEFAULT_SEPARATOR.to_owned();
        for attr in ATTRIBUTE.captures_iter(attrs) {
            let value = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
            match &attr[1] {
                "fields" => fields = Some(value.to_owned()),
                "separator" => separator = value.to_owned(),
                _ => {}
            }
        }

        let fields = fields.unwrap_or_else(|| family.default_field().to_owned());
        fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|field| self.field(family, field, ctx))
            .collect::<Vec<_>>()
            .join(&separator)
    }

    fn field(&self, family: Family, field: &str, ctx: &RenderContext<'_>) -> String {
        let builtin = match family {
            Family::Post => self.post_field(field, ctx),
            Family::Actor => user_field(ctx.dispatch.actor.as_ref(), field),
            Family::Workflow => workflow_field(field, ctx),
            Family::EditorialComment => self.comment_field(field, ctx),
            Family::Receiver => receiver_field(field, ctx),
        };
        builtin
            .or_else(|| self.extensions.iter().find_map(|ext| ext.field(family, field, ctx)))
            .unwrap_or_default()
    }

    fn post_field(&self, field: &str, ctx: &RenderContext<'_>) -> Option<String> {
        let event = &ctx.dispatch.event;
        let post = ctx.dispatch.post.as_ref();
        let author = ctx.post_author;
        let value = match field {
            "id" => post.map(|p| p.id.to_string()),
            "title" => post.map(|p| p.title.clone()),
            "url" | "permalink" => post.map(|p| p.permalink.clone()),
            "edit_link" => post.map(|p| p.edit_link.clone()),
            "date" => post.map(|p| self.format_date(p.date)),
            "time" => post.map(|p| self.format_time(p.date)),
            "old_status" => event.old_status().map(str::to_owned),
            "new_status" => event.new_status().map(str::to_owned),
            "status" => post.map(|p| p.status.clone()),
            "content" => post.map(|p| p.content.clone()),
            "excerpt" => post.map(|p| p.excerpt.clone()),
            "post_type" => post.map(|p| p.post_type.clone()),
            "author_display_name" => author.map(|a| a.display_name.clone()),
            "author_email" => author.map(|a| a.email.clone()),
            "author_login" => author.map(|a| a.login.clone()),
            "category" => post.map(|p| {
                p.terms_of(CATEGORY_TAXONOMY)
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(DEFAULT_SEPARATOR)
            }),
            "site_name" => Some(ctx.site.name.clone()),
            "site_url" => Some(ctx.site.url.clone()),
            _ => return None,
        };
        Some(value.unwrap_or_default())
    }

    fn comment_field(&self, field: &str, ctx: &RenderContext<'_>) -> Option<String> {
        let comment = ctx.dispatch.comment.as_ref();
        let value = match field {
            "id" => comment.map(|c| c.id.to_string()),
            "content" => comment.map(|c| c.content.clone()),
            "author" => comment.map(|c| c.author_name.clone()),
            "author_email" => comment.map(|c| c.author_email.clone()),
            "date" => comment.map(|c| self.format_date(c.date)),
            _ => return None,
        };
        Some(value.unwrap_or_default())
    }

    fn format_date(&self, at: DateTime<Utc>) -> String {
        at.format(&self.date_format).to_string()
    }

    fn format_time(&self, at: DateTime<Utc>) -> String {
        at.format(&self.time_format).to_string()
    }
}

fn user_field(user: Option<&User>, field: &str) -> Option<String> {
    let value = match field {
        "id" => user.map(|u| u.id.to_string()),
        "login" => user.map(|u| u.login.clone()),
        "url" => user.map(|u| u.url.clone()),
        "display_name" => user.map(|u| u.display_name.clone()),
        "email" => user.map(|u| u.email.clone()),
        "first_name" => user.map(|u| u.first_name.clone()),
        "last_name" => user.map(|u| u.last_name.clone()),
        _ => return None,
    };
    Some(value.unwrap_or_default())
}

fn workflow_field(field: &str, ctx: &RenderContext<'_>) -> Option<String> {
    let workflow = &ctx.dispatch.workflow;
    match field {
        "id" => Some(workflow.id.to_string()),
        "title" => Some(workflow.title.clone()),
        _ => None,
    }
}

fn receiver_field(field: &str, ctx: &RenderContext<'_>) -> Option<String> {
    let receiver = ctx.receiver;
    let user = ctx.receiver_user;
    let value = match field {
        "id" => receiver.and_then(Receiver::user_id).map(|id| id.to_string()),
        "name" => receiver.map(|r| r.display_name.clone()),
        "email" => receiver.map(|r| r.address.clone()),
        "first_name" => user.map(|u| u.first_name.clone()),
        "last_name" => user.map(|u| u.last_name.clone()),
        "login" => user.map(|u| u.login.clone()),
        _ => return None,
    };
    Some(value.unwrap_or_default())
}

/// `chrono` panics while displaying an invalid format, so reject those up
/// front.
fn checked_format(format: &str, fallback: &str) -> String {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        warn!(format, "invalid date/time format, using default");
        fallback.to_owned()
    } else {
        format.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::events::EventDescriptor;
    use crate::fixtures;
    use crate::host::EditorialComment;
    use crate::models::WorkflowDraft;

    fn dispatch() -> DispatchContext {
        let mut post = fixtures::post(10, 2);
        post.title = "Spring Issue".into();
        post.date = Utc.with_ymd_and_hms(2026, 3, 4, 15, 30, 0).unwrap();
        fixtures::add_category(&mut post, 1, "News");
        fixtures::add_category(&mut post, 2, "Sport");
        DispatchContext {
            event: EventDescriptor::status_transition(10, "draft", "publish", 3, 1, Utc::now()),
            workflow: fixtures::workflow(7, WorkflowDraft { title: "Published".into(), ..Default::default() }),
            post: Some(post),
            actor: Some(fixtures::user(3, "editor", &["editor"])),
            comment: Some(EditorialComment {
                id: 55,
                post_id: 10,
                author_id: 3,
                author_name: "Ed".into(),
                author_email: "ed@example.com".into(),
                content: "Looks good".into(),
                date: Utc::now(),
                comment_type: "editorial-comment".into(),
            }),
        }
    }

    fn render(text: &str) -> String {
        let dispatch = dispatch();
        let site = SiteConfig::default();
        let author = fixtures::user(2, "author", &["author"]);
        let receiver = Receiver::user(&author, "author", None);
        let ctx = RenderContext {
            dispatch: &dispatch,
            receiver: Some(&receiver),
            receiver_user: Some(&author),
            post_author: Some(&author),
            site: &site,
        };
        ContentRenderer::new("%Y-%m-%d", "%H:%M").render_text(text, &ctx)
    }

    #[test]
    fn post_title_renders_literally() {
        assert_eq!(render("New: [psppno_post]"), "New: Spring Issue");
        assert_eq!(render(r#"[psppno_post fields="title"]"#), "Spring Issue");
    }

    #[test]
    fn multiple_fields_join_with_separator() {
        assert_eq!(
            render(r#"[psppno_post fields="old_status, new_status"]"#),
            "draft, publish"
        );
        assert_eq!(
            render(r#"[psppno_post fields="date,time" separator=" at "]"#),
            "2026-03-04 at 15:30"
        );
        assert_eq!(render("[psppno_post fields='category']"), "News, Sport");
    }

    #[test]
    fn every_family_resolves() {
        assert_eq!(render("[psppno_actor]"), "Editor");
        assert_eq!(render(r#"[psppno_actor fields="login,email"]"#), "editor, editor@example.com");
        assert_eq!(render(r#"[psppno_workflow fields="id,title"]"#), "7, Published");
        assert_eq!(render("[psppno_edcomment]"), "Looks good");
        assert_eq!(render(r#"[psppno_receiver fields="name,email"]"#), "Author, author@example.com");
        assert_eq!(render(r#"[psppno_post fields="author_login,site_name"]"#), "author, Planner");
    }

    #[test]
    fn unknown_fields_render_empty_and_unknown_shortcodes_stay() {
        assert_eq!(render(r#"<[psppno_post fields="nope"]>"#), "<>");
        assert_eq!(render("[gallery ids=\"1\"] [psppno_other]"), "[gallery ids=\"1\"] [psppno_other]");
    }

    #[test]
    fn extensions_supply_missing_fields() {
        struct WordCount;
        impl FieldExtension for WordCount {
            fn field(&self, family: Family, field: &str, ctx: &RenderContext<'_>) -> Option<String> {
                (family == Family::Post && field == "word_count").then(|| {
                    let words = ctx.dispatch.post.as_ref().map_or(0, |p| p.content.split_whitespace().count());
                    words.to_string()
                })
            }
        }

        let mut dispatch = dispatch();
        if let Some(post) = dispatch.post.as_mut() {
            post.content = "one two three".into();
        }
        let site = SiteConfig::default();
        let ctx = RenderContext { dispatch: &dispatch, receiver: None, receiver_user: None, post_author: None, site: &site };
        let mut renderer = ContentRenderer::new("%Y", "%H");
        renderer.add_extension(Arc::new(WordCount));
        assert_eq!(renderer.render_text(r#"[psppno_post fields="word_count"]"#, &ctx), "3");
    }

    #[test]
    fn invalid_formats_fall_back() {
        let renderer = ContentRenderer::new("%Q%", "%H");
        assert_eq!(renderer.date_format, DEFAULT_DATE_FORMAT);
        assert_eq!(renderer.time_format, "%H");
    }
}
