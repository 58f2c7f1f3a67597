//! Domain types shared by every devbridge crate.
//!
//! Entity types form a closed enum; the comparable-field table is an
//! exhaustive match so a new entity type fails to compile until its fields
//! are declared.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseEnumError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of object that exists on both platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Issue,
    PullRequest,
    Comment,
    Commit,
    Wiki,
    Release,
}

impl EntityType {
    /// Every entity type, in declaration order.
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Issue,
            EntityType::PullRequest,
            EntityType::Comment,
            EntityType::Commit,
            EntityType::Wiki,
            EntityType::Release,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Issue => "issue",
            EntityType::PullRequest => "pull_request",
            EntityType::Comment => "comment",
            EntityType::Commit => "commit",
            EntityType::Wiki => "wiki",
            EntityType::Release => "release",
        }
    }

    /// Fields that take part in hashing and diffing for this entity type.
    pub fn comparable_fields(self) -> &'static [&'static str] {
        match self {
            EntityType::Issue => &["title", "description", "state", "labels", "assignees"],
            EntityType::PullRequest => &["title", "description", "state", "reviewers", "labels"],
            EntityType::Comment => &["content", "author", "created_at"],
            EntityType::Commit => &["message", "author", "changes"],
            EntityType::Wiki => &["content", "author", "updated_at"],
            EntityType::Release => &["name", "description", "tag_name", "assets"],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "issue" => Ok(EntityType::Issue),
            "pull_request" | "pr" => Ok(EntityType::PullRequest),
            "comment" => Ok(EntityType::Comment),
            "commit" => Ok(EntityType::Commit),
            "wiki" => Ok(EntityType::Wiki),
            "release" => Ok(EntityType::Release),
            _ => Err(ParseEnumError {
                kind: "entity type",
                value: s.to_string(),
                expected: "issue, pull_request, comment, commit, wiki, release",
            }),
        }
    }
}

/// One side of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[serde(rename = "github")]
    GitHub,
    Azure,
}

impl Platform {
    pub fn other(self) -> Platform {
        match self {
            Platform::GitHub => Platform::Azure,
            Platform::Azure => Platform::GitHub,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::GitHub => "github",
            Platform::Azure => "azure",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" | "gh" => Ok(Platform::GitHub),
            "azure" | "azure_devops" | "ado" => Ok(Platform::Azure),
            _ => Err(ParseEnumError {
                kind: "platform",
                value: s.to_string(),
                expected: "github, azure",
            }),
        }
    }
}

/// Which way a sync overwrites fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    GithubToAzure,
    AzureToGithub,
    Bidirectional,
}

impl SyncDirection {
    /// The platform whose snapshot is written, or `None` for bidirectional.
    pub fn source(self) -> Option<Platform> {
        match self {
            SyncDirection::GithubToAzure => Some(Platform::GitHub),
            SyncDirection::AzureToGithub => Some(Platform::Azure),
            SyncDirection::Bidirectional => None,
        }
    }

    /// One-directional sync that writes `source` onto the other platform.
    pub fn from_source(source: Platform) -> SyncDirection {
        match source {
            Platform::GitHub => SyncDirection::GithubToAzure,
            Platform::Azure => SyncDirection::AzureToGithub,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::GithubToAzure => "github_to_azure",
            SyncDirection::AzureToGithub => "azure_to_github",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "github_to_azure" => Ok(SyncDirection::GithubToAzure),
            "azure_to_github" => Ok(SyncDirection::AzureToGithub),
            "bidirectional" | "both" => Ok(SyncDirection::Bidirectional),
            _ => Err(ParseEnumError {
                kind: "sync direction",
                value: s.to_string(),
                expected: "github_to_azure, azure_to_github, bidirectional",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity reference
// ---------------------------------------------------------------------------

/// Unique key of a syncable object: `(entity_type, entity_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    entity_type: EntityType,
    entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Canonical, platform-independent view of an entity.
///
/// `fields` always holds exactly the comparable fields of `entity_type`;
/// fields the platform did not report are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_type: EntityType,
    pub fields: BTreeMap<String, Value>,
    /// Platform last-modified time. Not hashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Keep only the comparable fields of `entity_type` from `raw`.
    pub fn from_fields<I, K>(entity_type: EntityType, raw: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut raw: BTreeMap<String, Value> =
            raw.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let fields = entity_type
            .comparable_fields()
            .iter()
            .map(|field| {
                let value = raw.remove(*field).unwrap_or(Value::Null);
                ((*field).to_string(), value)
            })
            .collect();
        Self {
            entity_type,
            fields,
            modified_at: None,
        }
    }

    pub fn with_modified_at(mut self, modified_at: Option<DateTime<Utc>>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
