//! Shared test fixtures.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use channels::mock::MockChannel;
use channels::Channel;

use crate::clock::ManualClock;
use crate::config::NotificationsConfig;
use crate::context::{AppContext, AppContextBuilder};
use crate::host::{EditorialComment, InMemoryDirectory, Post, Term, User, CATEGORY_TAXONOMY};
use crate::models::{Workflow, WorkflowDraft};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

pub fn workflow(id: i64, draft: WorkflowDraft) -> Workflow {
    let now = start_time();
    Workflow {
        id,
        title: draft.title,
        status: draft.status,
        events: draft.events,
        filters: draft.filters,
        receivers: draft.receivers,
        content: draft.content,
        channels: draft.channels,
        is_default: draft.is_default,
        duplicate_threshold_minutes: draft.duplicate_threshold_minutes,
        created_at: now,
        updated_at: now,
    }
}

pub fn post(id: i64, author_id: i64) -> Post {
    Post {
        id,
        post_type: "post".into(),
        title: format!("Post {id}"),
        content: String::new(),
        excerpt: String::new(),
        status: "draft".into(),
        author_id,
        date: start_time(),
        permalink: format!("http://localhost/?p={id}"),
        edit_link: format!("http://localhost/edit?post={id}"),
        terms: Default::default(),
    }
}

pub fn add_category(post: &mut Post, id: i64, name: &str) {
    post.terms.entry(CATEGORY_TAXONOMY.to_owned()).or_default().push(Term {
        id,
        name: name.into(),
        slug: name.to_lowercase(),
    });
}

/// `login@example.com`, display name is the capitalised login.
pub fn user(id: i64, login: &str, roles: &[&str]) -> User {
    let mut display = login.to_owned();
    if let Some(first) = display.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    User {
        id,
        login: login.into(),
        email: format!("{login}@example.com"),
        display_name: display,
        first_name: String::new(),
        last_name: String::new(),
        url: String::new(),
        roles: roles.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>(),
        capabilities: BTreeSet::new(),
        active: true,
    }
}

pub fn comment(id: i64, post_id: i64, author_id: i64) -> EditorialComment {
    EditorialComment {
        id,
        post_id,
        author_id,
        author_name: String::new(),
        author_email: String::new(),
        content: format!("comment {id}"),
        date: start_time(),
        comment_type: crate::host::EDITORIAL_COMMENT_TYPE.into(),
    }
}

/// An application context over an in-memory database, a mock `email`
/// channel and a manual clock.
pub struct Harness {
    pub ctx: Arc<AppContext>,
    pub directory: Arc<InMemoryDirectory>,
    pub email: Arc<MockChannel>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(NotificationsConfig::default(), |b| b).await
    }

    pub async fn with_config(config: NotificationsConfig) -> Self {
        Self::build(config, |b| b).await
    }

    pub async fn build(
        config: NotificationsConfig,
        customize: impl FnOnce(AppContextBuilder) -> AppContextBuilder,
    ) -> Self {
        let pool = db::pool::create_memory_pool().await.unwrap();
        let directory = Arc::new(InMemoryDirectory::new());
        let email = Arc::new(MockChannel::delivering("email"));
        let clock = Arc::new(ManualClock::new(start_time()));

        let channel: Arc<dyn Channel> = email.clone();
        let builder = AppContext::builder(pool, directory.clone(), config)
            .channel(channel)
            .clock(clock.clone());
        let ctx = customize(builder).build();

        Self { ctx, directory, email, clock }
    }

    pub fn add_user(&self, user: User) {
        self.directory.upsert_user(user);
    }

    pub fn add_post(&self, post: Post) {
        self.directory.upsert_post(post);
    }

    pub fn add_comment(&self, comment: EditorialComment) {
        self.directory.upsert_comment(comment);
    }

    pub fn directory_post(&self, id: i64) -> Option<Post> {
        self.directory.get_post(id)
    }

    pub fn directory_user(&self, id: i64) -> Option<User> {
        self.directory.get_user(id)
    }
}
