//! Azure DevOps REST adapter (api-version 7.0).
//!
//! Issues map to work items. Work-item comments use composite ids
//! `<work_item>:<comment>`; wiki pages use their page path as id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::Method;
use serde_json::{json, Map, Value};

use devbridge_core::{AzureConfig, EntityType, HttpSettings, Platform, Snapshot};
use devbridge_sync::{ListFilter, PlatformAdapter, PlatformError};

use crate::error::ClientError;
use crate::http::{self, at, parse_time, pluck, present, strings};

const API_VERSION: &str = "7.0";
const COMMENTS_API_VERSION: &str = "7.0-preview.3";

/// Work-item states that read as canonical `closed`.
const CLOSED_STATES: &[&str] = &["Closed", "Done", "Resolved", "Removed"];

#[derive(Debug, Clone)]
pub struct AzureDevOpsAdapter {
    client: reqwest::Client,
    api_url: String,
    release_url: String,
    organization: String,
    project: String,
    repository: Option<String>,
    wiki: Option<String>,
    token: String,
}

impl AzureDevOpsAdapter {
    pub fn new(
        config: &AzureConfig,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let api_url = http::check_url(&config.api_url)?;
        // Release management lives on its own host in the hosted service.
        let release_url = if api_url == "https://dev.azure.com" {
            "https://vsrm.dev.azure.com".to_string()
        } else {
            api_url.clone()
        };
        Ok(Self {
            client: http::build_client(timeout)?,
            api_url,
            release_url,
            organization: config.organization.clone(),
            project: config.project.clone(),
            repository: config.repository.clone(),
            wiki: config.wiki.clone(),
            token: token.into(),
        })
    }

    /// Read the personal access token from `config.token_env`.
    pub fn from_config(config: &AzureConfig, settings: &HttpSettings) -> Result<Self, ClientError> {
        let token = http::read_token(&config.token_env)?;
        Self::new(config, token, settings.timeout())
    }

    fn project_url(&self, tail: &str) -> String {
        format!(
            "{}/{}/{}/_apis/{tail}",
            self.api_url, self.organization, self.project
        )
    }

    fn release_api(&self, tail: &str) -> String {
        format!(
            "{}/{}/{}/_apis/release/{tail}",
            self.release_url, self.organization, self.project
        )
    }

    fn repo_url(&self, tail: &str) -> Result<String, PlatformError> {
        let repo = self.repository.as_deref().ok_or_else(|| {
            PlatformError::Unsupported("azure.repository is not configured".to_string())
        })?;
        Ok(self.project_url(&format!("git/repositories/{repo}/{tail}")))
    }

    fn wiki_url(&self) -> Result<String, PlatformError> {
        let wiki = self.wiki.as_deref().ok_or_else(|| {
            PlatformError::Unsupported("azure.wiki is not configured".to_string())
        })?;
        Ok(self.project_url(&format!("wiki/wikis/{wiki}/pages")))
    }

    fn request(&self, method: Method, url: String, api_version: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth("", Some(&self.token))
            .query(&[("api-version", api_version)])
    }

    async fn get(&self, url: String, api_version: &str) -> Result<Value, PlatformError> {
        http::send_json(self.request(Method::GET, url, api_version), false).await
    }

    async fn fetch_wiki(&self, path: &str) -> Result<(Value, Option<String>), PlatformError> {
        let request = self
            .request(Method::GET, self.wiki_url()?, API_VERSION)
            .query(&[("path", path), ("includeContent", "true")]);
        let response = http::send(request, false).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;
        Ok((body, etag))
    }

    async fn list_work_items(&self, filter: &ListFilter) -> Result<Vec<String>, PlatformError> {
        let body = json!({ "query": wiql(filter) });
        let request = self
            .request(Method::POST, self.project_url("wit/wiql"), API_VERSION)
            .json(&body);
        let response = http::send_json(request, false).await?;
        Ok(ids_from(response.get("workItems"), "id"))
    }
}

#[async_trait]
impl PlatformAdapter for AzureDevOpsAdapter {
    fn platform(&self) -> Platform {
        Platform::Azure
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Snapshot, PlatformError> {
        let native = match entity_type {
            EntityType::Issue => {
                self.get(self.project_url(&format!("wit/workitems/{id}")), API_VERSION)
                    .await?
            }
            EntityType::PullRequest => {
                self.get(self.repo_url(&format!("pullrequests/{id}"))?, API_VERSION)
                    .await?
            }
            EntityType::Comment => {
                let (work_item, comment) = split_comment_id(id)?;
                let url = self.project_url(&format!("wit/workItems/{work_item}/comments/{comment}"));
                self.get(url, COMMENTS_API_VERSION).await?
            }
            EntityType::Commit => {
                let mut commit = self
                    .get(self.repo_url(&format!("commits/{id}"))?, API_VERSION)
                    .await?;
                let changes = self
                    .get(self.repo_url(&format!("commits/{id}/changes"))?, API_VERSION)
                    .await?;
                if let Value::Object(map) = &mut commit {
                    map.insert(
                        "changes".to_string(),
                        changes.get("changes").cloned().unwrap_or(Value::Null),
                    );
                }
                commit
            }
            EntityType::Wiki => self.fetch_wiki(id).await?.0,
            EntityType::Release => self.get(self.release_api(&format!("releases/{id}")), API_VERSION).await?,
        };
        Ok(to_snapshot(entity_type, &native))
    }

    async fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, PlatformError> {
        match entity_type {
            EntityType::Issue => self.list_work_items(filter).await,
            EntityType::PullRequest => {
                let status = match filter.get("state").map(String::as_str) {
                    Some("open") => "active",
                    Some("closed") => "abandoned",
                    Some("merged") => "completed",
                    _ => "all",
                };
                let request = self
                    .request(Method::GET, self.repo_url("pullrequests")?, API_VERSION)
                    .query(&[("searchCriteria.status", status)]);
                let body = http::send_json(request, false).await?;
                Ok(ids_from(body.get("value"), "pullRequestId"))
            }
            EntityType::Comment => {
                let work_item = filter.get("work_item").ok_or_else(|| {
                    PlatformError::Unsupported(
                        "listing comments requires a work_item filter".to_string(),
                    )
                })?;
                let url = self.project_url(&format!("wit/workItems/{work_item}/comments"));
                let body = self.get(url, COMMENTS_API_VERSION).await?;
                Ok(ids_from(body.get("comments"), "id")
                    .into_iter()
                    .map(|comment| format!("{work_item}:{comment}"))
                    .collect())
            }
            EntityType::Commit => {
                let body = self.get(self.repo_url("commits")?, API_VERSION).await?;
                Ok(ids_from(body.get("value"), "commitId"))
            }
            EntityType::Wiki => {
                let request = self
                    .request(Method::GET, self.wiki_url()?, API_VERSION)
                    .query(&[("path", "/"), ("recursionLevel", "full")]);
                let body = http::send_json(request, false).await?;
                let mut paths = Vec::new();
                collect_wiki_paths(&body, &mut paths);
                Ok(paths)
            }
            EntityType::Release => {
                let body = self.get(self.release_api("releases"), API_VERSION).await?;
                Ok(ids_from(body.get("value"), "id"))
            }
        }
    }

    async fn write(
        &self,
        entity_type: EntityType,
        id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError> {
        let request = match entity_type {
            EntityType::Issue => self
                .request(
                    Method::PATCH,
                    self.project_url(&format!("wit/workitems/{id}")),
                    API_VERSION,
                )
                .header(CONTENT_TYPE, "application/json-patch+json")
                .body(work_item_patch(snapshot).to_string()),
            EntityType::PullRequest => self
                .request(
                    Method::PATCH,
                    self.repo_url(&format!("pullrequests/{id}"))?,
                    API_VERSION,
                )
                .json(&pull_request_patch(snapshot)),
            EntityType::Comment => {
                let (work_item, comment) = split_comment_id(id)?;
                let body = json!({ "text": present(snapshot, "content").cloned().unwrap_or_default() });
                self.request(
                    Method::PATCH,
                    self.project_url(&format!("wit/workItems/{work_item}/comments/{comment}")),
                    COMMENTS_API_VERSION,
                )
                .json(&body)
            }
            EntityType::Commit => {
                return Err(PlatformError::Unsupported(
                    "commits are immutable".to_string(),
                ))
            }
            EntityType::Wiki => {
                // Page updates require the current ETag; a stale one is a 412.
                let (_, etag) = self.fetch_wiki(id).await?;
                let etag = etag.ok_or_else(|| {
                    PlatformError::InvalidResponse("wiki page response had no ETag".to_string())
                })?;
                let body = json!({ "content": present(snapshot, "content").cloned().unwrap_or_default() });
                self.request(Method::PUT, self.wiki_url()?, API_VERSION)
                    .query(&[("path", id)])
                    .header(IF_MATCH, etag)
                    .json(&body)
            }
            EntityType::Release => {
                let mut body = Map::new();
                for field in ["name", "description"] {
                    if let Some(value) = present(snapshot, field) {
                        body.insert(field.to_string(), value.clone());
                    }
                }
                self.request(
                    Method::PATCH,
                    self.release_api(&format!("releases/{id}")),
                    API_VERSION,
                )
                .json(&Value::Object(body))
            }
        };
        http::send(request, true).await?;
        Ok(())
    }
}

fn split_comment_id(id: &str) -> Result<(&str, &str), PlatformError> {
    id.split_once(':')
        .filter(|(w, c)| !w.is_empty() && !c.is_empty())
        .ok_or_else(|| {
            PlatformError::Unsupported(format!(
                "comment id {id:?} must be <work_item>:<comment>"
            ))
        })
}

fn ids_from(items: Option<&Value>, key: &str) -> Vec<String> {
    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item.get(key)? {
                    Value::Number(n) => Some(n.to_string()),
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn collect_wiki_paths(page: &Value, out: &mut Vec<String>) {
    if let Some(path) = page.get("path").and_then(Value::as_str) {
        if path != "/" {
            out.push(path.to_string());
        }
    }
    if let Some(children) = page.get("subPages").and_then(Value::as_array) {
        for child in children {
            collect_wiki_paths(child, out);
        }
    }
}

/// WIQL for the work-item listing. Only `state` and `type` filters apply.
pub(crate) fn wiql(filter: &ListFilter) -> String {
    let mut query =
        "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project".to_string();
    match filter.get("state").map(String::as_str) {
        Some("open") => {
            for state in CLOSED_STATES {
                query.push_str(&format!(" AND [System.State] <> '{state}'"));
            }
        }
        Some("closed") => query.push_str(" AND [System.State] IN ('Closed', 'Done', 'Resolved')"),
        Some(other) => query.push_str(&format!(" AND [System.State] = '{}'", escape(other))),
        None => {}
    }
    if let Some(kind) = filter.get("type") {
        query.push_str(&format!(" AND [System.WorkItemType] = '{}'", escape(kind)));
    }
    query.push_str(" ORDER BY [System.Id]");
    query
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Native Azure DevOps JSON → canonical snapshot.
pub(crate) fn to_snapshot(entity_type: EntityType, native: &Value) -> Snapshot {
    let fields: Vec<(&str, Value)> = match entity_type {
        EntityType::Issue => {
            let f = native.get("fields").cloned().unwrap_or(Value::Null);
            vec![
                ("title", at(&f, "/System.Title")),
                ("description", at(&f, "/System.Description")),
                ("state", work_item_state(f.get("System.State"))),
                ("labels", tags(f.get("System.Tags"))),
                ("assignees", assignees(f.get("System.AssignedTo"))),
            ]
        }
        EntityType::PullRequest => vec![
            ("title", at(native, "/title")),
            ("description", at(native, "/description")),
            ("state", pull_request_state(native.get("status"))),
            ("reviewers", pluck(native.get("reviewers"), "uniqueName")),
            ("labels", pluck(native.get("labels"), "name")),
        ],
        EntityType::Comment => vec![
            ("content", at(native, "/text")),
            ("author", at(native, "/createdBy/uniqueName")),
            ("created_at", at(native, "/createdDate")),
        ],
        EntityType::Commit => vec![
            ("message", at(native, "/comment")),
            ("author", at(native, "/author/name")),
            ("changes", commit_changes(native.get("changes"))),
        ],
        EntityType::Wiki => vec![
            ("content", at(native, "/content")),
            ("author", Value::Null),
            ("updated_at", Value::Null),
        ],
        EntityType::Release => vec![
            ("name", at(native, "/name")),
            ("description", at(native, "/description")),
            (
                "tag_name",
                native
                    .pointer("/tags/0")
                    .cloned()
                    .unwrap_or(Value::Null),
            ),
            ("assets", pluck(native.get("artifacts"), "alias")),
        ],
    };
    let modified_at = match entity_type {
        EntityType::Issue => parse_time(native.pointer("/fields/System.ChangedDate")),
        EntityType::PullRequest => parse_time(
            native
                .get("closedDate")
                .filter(|v| !v.is_null())
                .or_else(|| native.get("creationDate")),
        ),
        EntityType::Comment => parse_time(native.get("modifiedDate")),
        EntityType::Commit => parse_time(native.pointer("/committer/date")),
        EntityType::Wiki => None,
        EntityType::Release => parse_time(native.get("modifiedOn")),
    };
    Snapshot::from_fields(entity_type, fields).with_modified_at(modified_at)
}

fn work_item_state(state: Option<&Value>) -> Value {
    match state.and_then(Value::as_str) {
        Some(s) if CLOSED_STATES.contains(&s) => json!("closed"),
        Some(_) => json!("open"),
        None => Value::Null,
    }
}

fn pull_request_state(status: Option<&Value>) -> Value {
    match status.and_then(Value::as_str) {
        Some("active") => json!("open"),
        Some("completed") => json!("merged"),
        Some("abandoned") => json!("closed"),
        Some(other) => json!(other),
        None => Value::Null,
    }
}

/// `"a; b"` → `["a", "b"]`.
fn tags(raw: Option<&Value>) -> Value {
    let tags: Vec<Value> = raw
        .and_then(Value::as_str)
        .map(|s| {
            s.split(';')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Value::String(t.to_string()))
                .collect()
        })
        .unwrap_or_default();
    Value::Array(tags)
}

/// `System.AssignedTo` is an identity object (or a bare string on old servers).
fn assignees(raw: Option<&Value>) -> Value {
    let name = match raw {
        Some(Value::Object(identity)) => identity
            .get("uniqueName")
            .or_else(|| identity.get("displayName"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    Value::Array(name.into_iter().map(Value::String).collect())
}

fn commit_changes(raw: Option<&Value>) -> Value {
    let paths = raw
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter_map(|c| c.pointer("/item/path").and_then(Value::as_str))
                .map(|p| Value::String(p.trim_start_matches('/').to_string()))
                .collect()
        })
        .unwrap_or_default();
    Value::Array(paths)
}

/// JSON-patch document for a work item. Null canonical fields are skipped.
pub(crate) fn work_item_patch(snapshot: &Snapshot) -> Value {
    let mut ops = Vec::new();
    let mut add = |field: &str, value: Value| {
        ops.push(json!({ "op": "add", "path": format!("/fields/{field}"), "value": value }));
    };
    if let Some(title) = present(snapshot, "title") {
        add("System.Title", title.clone());
    }
    if let Some(description) = present(snapshot, "description") {
        add("System.Description", description.clone());
    }
    if let Some(state) = present(snapshot, "state").and_then(Value::as_str) {
        let native = match state {
            "closed" => "Closed",
            "open" => "Active",
            other => other,
        };
        add("System.State", json!(native));
    }
    if present(snapshot, "labels").is_some() {
        add("System.Tags", json!(strings(snapshot.get("labels")).join("; ")));
    }
    if present(snapshot, "assignees").is_some() {
        let first = strings(snapshot.get("assignees")).into_iter().next();
        add("System.AssignedTo", json!(first.unwrap_or_default()));
    }
    Value::Array(ops)
}

pub(crate) fn pull_request_patch(snapshot: &Snapshot) -> Value {
    let mut body = Map::new();
    for field in ["title", "description"] {
        if let Some(value) = present(snapshot, field) {
            body.insert(field.to_string(), value.clone());
        }
    }
    if let Some(state) = present(snapshot, "state").and_then(Value::as_str) {
        let status = match state {
            "open" => "active",
            "closed" => "abandoned",
            "merged" => "completed",
            other => other,
        };
        body.insert("status".to_string(), json!(status));
    }
    Value::Object(body)
}
