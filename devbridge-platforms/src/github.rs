//! GitHub REST v3 adapter.
//!
//! Comments use the same composite `<issue>:<comment>` ids as the Azure
//! adapter; only the comment part reaches the `/issues/comments` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Map, Value};

use devbridge_core::{EntityType, GitHubConfig, HttpSettings, Platform, Snapshot};
use devbridge_sync::{ListFilter, PlatformAdapter, PlatformError};

use crate::error::ClientError;
use crate::http::{self, at, parse_time, pluck, present, strings};

const PER_PAGE: usize = 100;
/// Listing stops after this many pages.
const MAX_PAGES: usize = 50;

#[derive(Debug, Clone)]
pub struct GitHubAdapter {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubAdapter {
    pub fn new(
        config: &GitHubConfig,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            api_url: http::check_url(&config.api_url)?,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token: token.into(),
        })
    }

    /// Read the token from `config.token_env`.
    pub fn from_config(config: &GitHubConfig, settings: &HttpSettings) -> Result<Self, ClientError> {
        let token = http::read_token(&config.token_env)?;
        Self::new(config, token, settings.timeout())
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{tail}", self.api_url, self.owner, self.repo)
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Collection path for listing, or `Unsupported`.
    fn collection(entity_type: EntityType) -> Result<&'static str, PlatformError> {
        match entity_type {
            EntityType::Issue => Ok("issues"),
            EntityType::PullRequest => Ok("pulls"),
            EntityType::Comment => Ok("issues/comments"),
            EntityType::Commit => Ok("commits"),
            EntityType::Release => Ok("releases"),
            EntityType::Wiki => Err(wiki_unsupported()),
        }
    }

    fn entity_url(&self, entity_type: EntityType, id: &str) -> Result<String, PlatformError> {
        let id = match entity_type {
            EntityType::Comment => split_comment_id(id)?.1,
            _ => id,
        };
        Ok(self.repo_url(&format!("{}/{id}", Self::collection(entity_type)?)))
    }
}

fn wiki_unsupported() -> PlatformError {
    PlatformError::Unsupported("GitHub wikis are not exposed through the REST API".to_string())
}

#[async_trait]
impl PlatformAdapter for GitHubAdapter {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Snapshot, PlatformError> {
        let url = self.entity_url(entity_type, id)?;
        let native = http::send_json(self.request(Method::GET, url), false).await?;
        Ok(to_snapshot(entity_type, &native))
    }

    async fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, PlatformError> {
        // `work_item` narrows comments to one issue, like the Azure adapter.
        let mut query = filter.clone();
        let url = match (entity_type, query.remove("work_item")) {
            (EntityType::Comment, Some(issue)) => {
                self.repo_url(&format!("issues/{issue}/comments"))
            }
            _ => self.repo_url(Self::collection(entity_type)?),
        };
        let mut ids = Vec::new();
        for page in 1..=MAX_PAGES {
            let request = self
                .request(Method::GET, url.clone())
                .query(&query)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let body = http::send_json(request, false).await?;
            let items = body
                .as_array()
                .ok_or_else(|| PlatformError::InvalidResponse("expected a JSON array".into()))?;
            ids.extend(
                items
                    .iter()
                    // The issues listing also returns pull requests.
                    .filter(|item| {
                        entity_type != EntityType::Issue || item.get("pull_request").is_none()
                    })
                    .filter_map(|item| native_id(entity_type, item)),
            );
            if items.len() < PER_PAGE {
                break;
            }
        }
        Ok(ids)
    }

    async fn write(
        &self,
        entity_type: EntityType,
        id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError> {
        match entity_type {
            EntityType::Commit => {
                return Err(PlatformError::Unsupported(
                    "commits are immutable".to_string(),
                ))
            }
            EntityType::Wiki => return Err(wiki_unsupported()),
            _ => {}
        }
        let url = self.entity_url(entity_type, id)?;
        let body = to_native(entity_type, snapshot);
        http::send(self.request(Method::PATCH, url).json(&body), true).await?;

        // Pull request labels and reviewers live on separate endpoints.
        if entity_type == EntityType::PullRequest {
            if let Some(labels) = present(snapshot, "labels") {
                let url = self.repo_url(&format!("issues/{id}/labels"));
                let body = json!({ "labels": labels });
                http::send(self.request(Method::PUT, url).json(&body), true).await?;
            }
            let reviewers = strings(snapshot.get("reviewers"));
            if !reviewers.is_empty() {
                let url = self.repo_url(&format!("pulls/{id}/requested_reviewers"));
                let body = json!({ "reviewers": reviewers });
                http::send(self.request(Method::POST, url).json(&body), true).await?;
            }
        }
        Ok(())
    }
}

fn split_comment_id(id: &str) -> Result<(&str, &str), PlatformError> {
    id.split_once(':')
        .filter(|(issue, comment)| !issue.is_empty() && !comment.is_empty())
        .ok_or_else(|| {
            PlatformError::Unsupported(format!("comment id {id:?} must be <issue>:<comment>"))
        })
}

fn native_id(entity_type: EntityType, item: &Value) -> Option<String> {
    if entity_type == EntityType::Comment {
        let issue = item.get("issue_url")?.as_str()?.rsplit('/').next()?;
        let comment = item.get("id")?.as_u64()?;
        return Some(format!("{issue}:{comment}"));
    }
    let key = match entity_type {
        EntityType::Issue | EntityType::PullRequest => "number",
        EntityType::Commit => "sha",
        EntityType::Comment | EntityType::Release | EntityType::Wiki => "id",
    };
    match item.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Native GitHub JSON → canonical snapshot.
pub(crate) fn to_snapshot(entity_type: EntityType, native: &Value) -> Snapshot {
    let fields: Vec<(&str, Value)> = match entity_type {
        EntityType::Issue => vec![
            ("title", at(native, "/title")),
            ("description", at(native, "/body")),
            ("state", at(native, "/state")),
            ("labels", pluck(native.get("labels"), "name")),
            ("assignees", pluck(native.get("assignees"), "login")),
        ],
        EntityType::PullRequest => vec![
            ("title", at(native, "/title")),
            ("description", at(native, "/body")),
            ("state", pull_state(native)),
            ("reviewers", pluck(native.get("requested_reviewers"), "login")),
            ("labels", pluck(native.get("labels"), "name")),
        ],
        EntityType::Comment => vec![
            ("content", at(native, "/body")),
            ("author", at(native, "/user/login")),
            ("created_at", at(native, "/created_at")),
        ],
        EntityType::Commit => vec![
            ("message", at(native, "/commit/message")),
            ("author", at(native, "/commit/author/name")),
            ("changes", pluck(native.get("files"), "filename")),
        ],
        EntityType::Release => vec![
            ("name", at(native, "/name")),
            ("description", at(native, "/body")),
            ("tag_name", at(native, "/tag_name")),
            ("assets", pluck(native.get("assets"), "name")),
        ],
        EntityType::Wiki => Vec::new(),
    };
    let modified_at = match entity_type {
        EntityType::Commit => parse_time(native.pointer("/commit/committer/date")),
        EntityType::Release => parse_time(
            native
                .get("published_at")
                .filter(|v| !v.is_null())
                .or_else(|| native.get("created_at")),
        ),
        _ => parse_time(native.get("updated_at")),
    };
    Snapshot::from_fields(entity_type, fields).with_modified_at(modified_at)
}

/// Merged pull requests report `closed` natively.
fn pull_state(native: &Value) -> Value {
    let merged = native.get("merged_at").map(|v| !v.is_null()).unwrap_or(false);
    if merged {
        Value::String("merged".to_string())
    } else {
        at(native, "/state")
    }
}

/// Canonical snapshot → PATCH body. Null fields are left untouched.
pub(crate) fn to_native(entity_type: EntityType, snapshot: &Snapshot) -> Value {
    let mapping: &[(&str, &str)] = match entity_type {
        EntityType::Issue => &[
            ("title", "title"),
            ("description", "body"),
            ("state", "state"),
            ("labels", "labels"),
            ("assignees", "assignees"),
        ],
        EntityType::PullRequest => &[("title", "title"), ("description", "body")],
        EntityType::Comment => &[("content", "body")],
        EntityType::Release => &[
            ("name", "name"),
            ("description", "body"),
            ("tag_name", "tag_name"),
        ],
        EntityType::Commit | EntityType::Wiki => &[],
    };
    let mut body = Map::new();
    for (canonical, native) in mapping {
        if let Some(value) = present(snapshot, canonical) {
            body.insert((*native).to_string(), value.clone());
        }
    }
    if entity_type == EntityType::PullRequest {
        // `merged` cannot be written back; it is closed from the API's view.
        if let Some(state) = present(snapshot, "state").and_then(Value::as_str) {
            let state = if state == "merged" { "closed" } else { state };
            body.insert("state".to_string(), Value::String(state.to_string()));
        }
    }
    Value::Object(body)
}
