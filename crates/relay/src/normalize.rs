//! Conversion of push feed records into webhook-shaped notification documents.
//!
//! The output mirrors the subset of GitHub's `push` webhook payload that
//! downstream receivers (chat integrations, CI hooks) actually read. Fields the
//! activity feed cannot provide are filled with fixed values: `created`,
//! `deleted` and `forced` are `false`, `base_ref` is `null`, and the pusher
//! e-mail is a placeholder.
//!
//! Everything here is a pure function of its input.

use serde::Serialize;

use crate::feed::{Actor, CommitAuthor, PushEvent, RepoRef};

/// Web origin used to build `html_url`, commit and compare links.
pub const GITHUB_WEB_URL: &str = "https://github.com";

/// Placeholder e-mail for the pusher; the feed does not expose it.
const PUSHER_EMAIL: &str = "example@localhost";

/// Repository block of a [`PushNotification`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRepository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub html_url: String,
}

/// Account block used for `sender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationUser {
    pub login: String,
    pub id: u64,
    pub avatar_url: String,
    pub url: String,
    pub html_url: String,
}

/// `pusher` block: login and placeholder e-mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pusher {
    pub name: String,
    pub email: String,
}

/// One commit summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationCommit {
    pub id: String,
    pub distinct: bool,
    pub message: String,
    pub url: String,
    pub author: CommitAuthor,
}

/// A push notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    pub created: bool,
    pub deleted: bool,
    pub forced: bool,
    pub base_ref: Option<String>,
    pub compare: String,
    pub commits: Vec<NotificationCommit>,
    pub head_commit: Option<NotificationCommit>,
    pub repository: NotificationRepository,
    pub pusher: Pusher,
    pub sender: NotificationUser,
}

/// Builds the notification for a push record, as returned by
/// [`crate::FeedRecord::as_push`].
pub fn normalize_push(event: &PushEvent) -> PushNotification {
    let push = &event.payload;
    let repository = repository_block(&event.repo);
    let commits: Vec<NotificationCommit> = push
        .commits
        .iter()
        .map(|commit| NotificationCommit {
            id: commit.sha.to_string(),
            distinct: commit.distinct,
            message: commit.message.clone(),
            url: format!("{}/commit/{}", repository.html_url, commit.sha),
            author: commit.author.clone(),
        })
        .collect();

    PushNotification {
        git_ref: push.git_ref.clone(),
        before: push.before.to_string(),
        after: push.head.to_string(),
        created: false,
        deleted: false,
        forced: false,
        base_ref: None,
        compare: format!(
            "{}/compare/{}...{}",
            repository.html_url,
            push.before.short(),
            push.head.short()
        ),
        head_commit: commits.last().cloned(),
        commits,
        repository,
        pusher: Pusher {
            name: event.actor.login.clone(),
            email: PUSHER_EMAIL.to_string(),
        },
        sender: user_block(&event.actor),
    }
}

fn repository_block(repo: &RepoRef) -> NotificationRepository {
    let full_name = repo.name.as_str();
    NotificationRepository {
        id: repo.id,
        name: repo.name.name().to_string(),
        full_name: full_name.to_string(),
        url: repo.url.clone(),
        html_url: format!("{GITHUB_WEB_URL}/{full_name}"),
    }
}

fn user_block(actor: &Actor) -> NotificationUser {
    NotificationUser {
        login: actor.login.clone(),
        id: actor.id,
        avatar_url: actor.avatar_url.clone(),
        url: actor.url.clone(),
        html_url: format!("{GITHUB_WEB_URL}/{}", actor.login),
    }
}
