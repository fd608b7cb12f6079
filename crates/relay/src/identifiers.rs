//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`BranchName`] with a [`CacheToken`] even though both are `String` under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// Deserialisation goes through new(), so an empty value never decodes.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = &'static str;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or(concat!(stringify!($name), " must not be empty"))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: GitHub-integer-backed
// ---------------------------------------------------------------------------

/// Identifies one record in the repository activity feed.
///
/// GitHub assigns these from a global, increasing sequence, which is what makes
/// them usable as a watermark. The feed transmits them as decimal strings; see
/// [`EventId::parse`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventId(u64);

impl EventId {
    /// The "never run" watermark value. No real feed record carries it.
    pub const ZERO: EventId = EventId(0);

    /// Creates a new identifier from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parses the decimal string form used on the wire.
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<u64>().ok().map(Self)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single poll cycle (one invocation of [`crate::PollCycle::run`]).
///
/// Generated fresh for every cycle; recorded on the cycle span so all activity
/// from one cycle (fetch, dispatches, state write) can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Generates a new random cycle identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (configuration / Git names)
// ---------------------------------------------------------------------------

string_id! {
    /// A Git branch name without the `refs/heads/` prefix (e.g. `"main"`).
    BranchName
}

impl BranchName {
    /// Returns the fully qualified ref for this branch (`refs/heads/<name>`).
    pub fn to_ref(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// Returns `true` if `git_ref` names this branch.
    pub fn matches_ref(&self, git_ref: &str) -> bool {
        git_ref
            .strip_prefix("refs/heads/")
            .is_some_and(|name| name == self.0)
    }
}

string_id! {
    /// A Git commit SHA as reported by the feed. Only non-emptiness is checked.
    CommitSha
}

impl CommitSha {
    /// Returns the abbreviated form used in compare URLs (first 12 characters,
    /// or the whole value when it is shorter).
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

string_id! {
    /// Opaque cache validator returned by the feed API (an HTTP `ETag`).
    ///
    /// Echoed verbatim on the next request; never inspected.
    CacheToken
}

// ---------------------------------------------------------------------------
// Repository identity
// ---------------------------------------------------------------------------

/// Identifies a GitHub repository in `"owner/name"` format.
///
/// Both halves are non-empty and contain no further `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryId {
    full_name: String,
    split: usize,
}

impl RepositoryId {
    /// Parses an `owner/name` string, returning `None` if it is malformed.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (owner, name) = value.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            full_name: value.to_string(),
            split: owner.len(),
        })
    }

    /// Returns the repository owner (user or organisation login).
    pub fn owner(&self) -> &str {
        &self.full_name[..self.split]
    }

    /// Returns the repository name without the owner.
    pub fn name(&self) -> &str {
        &self.full_name[self.split + 1..]
    }

    /// Returns the `owner/name` form.
    pub fn as_str(&self) -> &str {
        &self.full_name
    }
}

impl TryFrom<String> for RepositoryId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid repository '{value}', expected owner/name"))
    }
}

impl From<RepositoryId> for String {
    fn from(value: RepositoryId) -> Self {
        value.full_name
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_id_splits_owner_and_name() {
        let repo = RepositoryId::parse("DisnakeDev/disnake").unwrap();
        assert_eq!(repo.owner(), "DisnakeDev");
        assert_eq!(repo.name(), "disnake");
        assert_eq!(repo.as_str(), "DisnakeDev/disnake");
    }

    #[test]
    fn string_ids_reject_empty_values_when_decoding() {
        let err = serde_json::from_str::<CommitSha>("\"\"").unwrap_err();
        assert!(err.to_string().contains("CommitSha must not be empty"));
        assert!(serde_json::from_str::<CacheToken>("\"\"").is_err());

        let sha: CommitSha = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(sha.as_str(), "abc123");
        assert_eq!(serde_json::to_string(&sha).unwrap(), "\"abc123\"");
    }

    #[test]
    fn repository_id_rejects_malformed_values() {
        for bad in ["", "owner", "/repo", "owner/", "a/b/c"] {
            assert!(RepositoryId::parse(bad).is_none(), "accepted {bad:?}");
        }
    }

    #[test]
    fn repository_id_deserializes_with_validation() {
        let ok: RepositoryId = serde_json::from_str("\"owner/repo\"").unwrap();
        assert_eq!(ok.name(), "repo");
        assert!(serde_json::from_str::<RepositoryId>("\"nope\"").is_err());
    }

    #[test]
    fn branch_matches_only_its_own_head_ref() {
        let main = BranchName::new("main").unwrap();
        assert!(main.matches_ref("refs/heads/main"));
        assert!(!main.matches_ref("refs/heads/dev"));
        assert!(!main.matches_ref("refs/heads/main-2"));
        assert!(!main.matches_ref("refs/tags/main"));
        assert_eq!(main.to_ref(), "refs/heads/main");
    }

    #[test]
    fn commit_sha_short_form_is_twelve_chars() {
        let sha = CommitSha::new("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(sha.short(), "0123456789ab");
        let tiny = CommitSha::new("abc").unwrap();
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn event_id_parses_wire_strings() {
        assert_eq!(EventId::parse("12345"), Some(EventId::new(12345)));
        assert_eq!(EventId::parse("not-a-number"), None);
        assert!(EventId::new(2) > EventId::new(1));
    }
}
