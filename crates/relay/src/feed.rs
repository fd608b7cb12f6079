//! Validated data contract for repository activity feed records.
//!
//! The events API returns a loosely typed array: every record has an `id`,
//! `type`, `actor`, `repo` and `created_at`, and a `payload` whose shape depends
//! on `type`. Only the fields the relay consumes are modelled here. Parsing
//! happens once at the boundary ([`parse_page`]); the rest of the crate works
//! with [`FeedRecord`] values that are known to be well formed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CommitSha, EventId, RepositoryId, Timestamp};

/// Feed `type` discriminator of the push variant.
pub const PUSH_EVENT_TYPE: &str = "PushEvent";

/// A feed page or record failed validation.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The response body is not a JSON array of records.
    #[error("feed page is not a valid record array")]
    MalformedPage(#[source] serde_json::Error),

    /// A record's `id` is not a decimal integer.
    #[error("feed record has non-numeric id '{raw}'")]
    InvalidId {
        /// The id as received.
        raw: String,
    },

    /// A record's common fields or its push payload do not match the contract.
    #[error("feed record {id} ({kind}) does not match the expected shape")]
    InvalidRecord {
        /// Raw id of the offending record.
        id: String,
        /// The record's `type` discriminator.
        kind: String,
        /// Underlying decoding error.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Validated record types
// ---------------------------------------------------------------------------

/// The account that caused a feed record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Actor {
    /// Numeric account id.
    pub id: u64,
    /// Account login.
    pub login: String,
    /// API URL of the account.
    pub url: String,
    /// Avatar image URL.
    pub avatar_url: String,
}

/// The repository a feed record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoRef {
    /// Numeric repository id.
    pub id: u64,
    /// `owner/name` of the repository.
    pub name: RepositoryId,
    /// API URL of the repository.
    pub url: String,
}

/// Name and e-mail recorded on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    /// Display name (not the account login).
    pub name: String,
    /// Author e-mail.
    pub email: String,
}

/// One commit carried by a push record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushCommit {
    /// Commit SHA.
    pub sha: CommitSha,
    /// Commit author.
    pub author: CommitAuthor,
    /// Full commit message.
    pub message: String,
    /// Whether the commit was new to the pushed ref.
    pub distinct: bool,
}

/// Payload of a `PushEvent` record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    /// Fully qualified ref that was pushed (`refs/heads/main`).
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit the ref pointed to before the push.
    pub before: CommitSha,
    /// Commit the ref points to after the push.
    pub head: CommitSha,
    /// Pushed commits, oldest first.
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

/// A validated `PushEvent` record: who pushed, where, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Account that pushed.
    pub actor: Actor,
    /// Repository that was pushed to.
    pub repo: RepoRef,
    /// Creation time, when the feed provides one.
    pub created_at: Option<Timestamp>,
    /// The push itself.
    pub payload: PushPayload,
}

/// Variant-specific part of a feed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    /// A branch or tag update with its commits.
    Push(PushEvent),
    /// Any other activity type. Only its discriminator is kept; the rest of
    /// the record is never read, so it is not validated either.
    Other(String),
}

/// One validated entry of the activity feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    /// Feed-assigned identifier, increasing over time.
    pub id: EventId,
    /// Variant-specific data.
    pub kind: RecordKind,
}

impl FeedRecord {
    /// Returns the push event if this is a push record.
    pub fn as_push(&self) -> Option<&PushEvent> {
        match &self.kind {
            RecordKind::Push(event) => Some(event),
            RecordKind::Other(_) => None,
        }
    }

    /// Returns the feed `type` discriminator.
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            RecordKind::Push(_) => PUSH_EVENT_TYPE,
            RecordKind::Other(kind) => kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(flatten)]
    common: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct PushFields {
    actor: Actor,
    repo: RepoRef,
    #[serde(default)]
    created_at: Option<Timestamp>,
}

/// Parses one feed page (newest first) from a response body.
///
/// Every record must have a numeric `id` and a `type`. Push records must also
/// carry a valid actor, repository and push payload; other records are kept by
/// id and type only, so an odd shape there cannot block the page.
pub fn parse_page(body: &[u8]) -> Result<Vec<FeedRecord>, RecordError> {
    let raw: Vec<RawRecord> = serde_json::from_slice(body).map_err(RecordError::MalformedPage)?;
    raw.into_iter().map(validate).collect()
}

fn validate(raw: RawRecord) -> Result<FeedRecord, RecordError> {
    let id = EventId::parse(&raw.id).ok_or_else(|| RecordError::InvalidId { raw: raw.id.clone() })?;
    if raw.kind != PUSH_EVENT_TYPE {
        return Ok(FeedRecord {
            id,
            kind: RecordKind::Other(raw.kind),
        });
    }

    let invalid = |source| RecordError::InvalidRecord {
        id: raw.id.clone(),
        kind: raw.kind.clone(),
        source,
    };
    let fields: PushFields =
        serde_json::from_value(serde_json::Value::Object(raw.common.clone())).map_err(invalid)?;
    let payload: PushPayload = serde_json::from_value(raw.payload.clone()).map_err(invalid)?;

    Ok(FeedRecord {
        id,
        kind: RecordKind::Push(PushEvent {
            actor: fields.actor,
            repo: fields.repo,
            created_at: fields.created_at,
            payload,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_json(id: &str, git_ref: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "PushEvent",
            "actor": {
                "id": 1,
                "login": "octocat",
                "display_login": "octocat",
                "gravatar_id": "",
                "url": "https://api.github.com/users/octocat",
                "avatar_url": "https://avatars.githubusercontent.com/u/1?"
            },
            "repo": {
                "id": 99,
                "name": "owner/repo",
                "url": "https://api.github.com/repos/owner/repo"
            },
            "payload": {
                "repository_id": 99,
                "push_id": 5,
                "size": 1,
                "distinct_size": 1,
                "ref": git_ref,
                "head": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "before": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "commits": [{
                    "sha": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                    "author": { "email": "a@example.com", "name": "A" },
                    "message": "fix things",
                    "distinct": true,
                    "url": "https://api.github.com/repos/owner/repo/commits/bbbb"
                }]
            },
            "public": true,
            "created_at": "2024-05-01T12:00:00Z"
        })
    }

    #[test]
    fn parses_push_and_other_records() {
        let body = json!([
            push_json("102", "refs/heads/main"),
            {
                "id": "101",
                "type": "WatchEvent",
                "actor": { "id": 2, "login": "fan", "url": "u", "avatar_url": "a" },
                "repo": { "id": 99, "name": "owner/repo", "url": "r" },
                "payload": { "action": "started" },
                "created_at": null
            }
        ]);
        let records = parse_page(body.to_string().as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, EventId::new(102));
        let push = records[0].as_push().unwrap();
        assert_eq!(push.payload.git_ref, "refs/heads/main");
        assert_eq!(push.payload.commits.len(), 1);
        assert_eq!(push.repo.name.as_str(), "owner/repo");
        assert!(push.created_at.is_some());

        assert_eq!(records[1].kind_name(), "WatchEvent");
        assert!(records[1].as_push().is_none());
    }

    #[test]
    fn odd_non_push_records_do_not_fail_the_page() {
        let body = json!([
            push_json("102", "refs/heads/main"),
            {
                "id": "101",
                "type": "WatchEvent",
                "actor": { "id": 2, "login": "fan" },
                "payload": { "action": "started" }
            }
        ]);
        let records = parse_page(body.to_string().as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].as_push().is_some());
        assert_eq!(records[1].id, EventId::new(101));
        assert_eq!(records[1].kind, RecordKind::Other("WatchEvent".into()));
    }

    #[test]
    fn push_records_still_need_a_valid_actor() {
        let mut record = push_json("7", "refs/heads/main");
        record["actor"].as_object_mut().unwrap().remove("avatar_url");
        let err = parse_page(json!([record]).to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { ref id, .. } if id == "7"));
    }

    #[test]
    fn push_records_reject_empty_shas() {
        let mut record = push_json("8", "refs/heads/main");
        record["payload"]["before"] = json!("");
        record["payload"]["head"] = json!("");
        let err = parse_page(json!([record]).to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { ref id, .. } if id == "8"));
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let body = json!([push_json("abc", "refs/heads/main")]);
        let err = parse_page(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidId { ref raw } if raw == "abc"));
    }

    #[test]
    fn rejects_push_records_missing_payload_fields() {
        let mut record = push_json("5", "refs/heads/main");
        record["payload"].as_object_mut().unwrap().remove("head");
        let err = parse_page(json!([record]).to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidRecord { ref id, .. } if id == "5"));
    }

    #[test]
    fn rejects_bodies_that_are_not_arrays() {
        let err = parse_page(br#"{"message":"Not Found"}"#).unwrap_err();
        assert!(matches!(err, RecordError::MalformedPage(_)));
    }

    #[test]
    fn empty_page_is_valid() {
        assert!(parse_page(b"[]").unwrap().is_empty());
    }
}
