//! Confluence Cloud REST transport.

use crate::bulk::operation::{OperationDescriptor, OperationKind, Principal};
use crate::error::{BulkError, ErrorKind, RemoteError};
use crate::transport::{ItemSnapshot, Page, PageRequest, SnapshotAspect, Transport};
use crate::types::{CandidateItem, ItemKind};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const LABEL_PAGE_LIMIT: &str = "200";

/// Credentials for Confluence Cloud basic auth (account email + API token).
#[derive(Clone)]
pub struct ConfluenceCredentials {
    pub email: String,
    pub api_token: String,
}

impl std::fmt::Debug for ConfluenceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfluenceCredentials")
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

// Map transport-level reqwest failures (no usable response) to a RemoteError
fn map_http_error(error: reqwest::Error) -> RemoteError {
    if let Some(status) = error.status() {
        RemoteError::from_status(status.as_u16(), error.to_string())
    } else if error.is_timeout() {
        RemoteError::new(ErrorKind::Network, format!("Request timeout: {}", error))
    } else if error.is_connect() {
        RemoteError::new(ErrorKind::Network, format!("Connection error: {}", error))
    } else if error.is_decode() {
        RemoteError::new(ErrorKind::Server, format!("Malformed response: {}", error))
    } else {
        RemoteError::new(ErrorKind::Network, format!("HTTP error: {}", error))
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract the `cursor` query parameter from a `_links.next` link.
pub fn cursor_from_next_link(next: &str) -> Option<String> {
    let base = Url::parse("https://confluence.invalid/wiki/").ok()?;
    let url = base.join(next).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContentResult>,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Deserialize, Default)]
struct Links {
    next: Option<String>,
}

#[derive(Deserialize)]
struct ContentResult {
    id: String,
    #[serde(rename = "type")]
    content_type: ItemKind,
    #[serde(default)]
    title: String,
    version: Option<VersionInfo>,
}

#[derive(Deserialize)]
struct VersionInfo {
    number: u64,
}

#[derive(Deserialize)]
struct LabelList {
    #[serde(default)]
    results: Vec<LabelEntry>,
}

#[derive(Deserialize)]
struct LabelEntry {
    name: String,
}

#[derive(Deserialize)]
struct AncestorsResponse {
    #[serde(default)]
    ancestors: Vec<AncestorEntry>,
}

#[derive(Deserialize)]
struct AncestorEntry {
    id: String,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: VersionInfo,
}

#[derive(Deserialize)]
struct BodyResponse {
    body: BodyField,
}

#[derive(Deserialize)]
struct BodyField {
    storage: StorageField,
}

#[derive(Deserialize)]
struct StorageField {
    value: String,
}

#[derive(Deserialize)]
struct OperationRestrictions {
    restrictions: RestrictionSet,
}

#[derive(Deserialize, Default)]
struct RestrictionSet {
    #[serde(default)]
    user: Option<RestrictionUsers>,
    #[serde(default)]
    group: Option<RestrictionGroups>,
}

#[derive(Deserialize)]
struct RestrictionUsers {
    #[serde(default)]
    results: Vec<UserEntry>,
}

#[derive(Deserialize)]
struct UserEntry {
    #[serde(rename = "accountId")]
    account_id: String,
}

#[derive(Deserialize)]
struct RestrictionGroups {
    #[serde(default)]
    results: Vec<GroupEntry>,
}

#[derive(Deserialize)]
struct GroupEntry {
    name: String,
}

/// Confluence Cloud client implementing [`Transport`] over the v1 REST API.
pub struct ConfluenceClient {
    client: Client,
    base_url: Url,
    credentials: ConfluenceCredentials,
}

impl ConfluenceClient {
    pub fn new(base_url: &str, credentials: ConfluenceCredentials) -> Result<Self, BulkError> {
        Self::with_timeouts(
            base_url,
            credentials,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        credentials: ConfluenceCredentials,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BulkError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix("/wiki").unwrap_or(trimmed);
        let base_url = Url::parse(trimmed).map_err(|e| {
            BulkError::ConfigError(format!("Invalid Confluence base URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BulkError::ConfigError(format!(
                "Confluence base URL '{}' cannot carry a path",
                base_url
            )));
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| BulkError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// `{base}/wiki/rest/api/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::new(ErrorKind::Validation, "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["wiki", "rest", "api"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.credentials.email, Some(&self.credentials.api_token))
            .header("Accept", "application/json")
    }

    /// Send a request and turn non-success statuses into classified errors.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(map_http_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        debug!(status = status.as_u16(), "confluence_request_failed");
        Err(RemoteError::from_status(
            status.as_u16(),
            format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300)),
        )
        .with_retry_after(retry_after))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let response = self.send(self.request(Method::GET, url).query(query)).await?;
        response.json::<T>().await.map_err(map_http_error)
    }

    async fn current_version(&self, item: &CandidateItem) -> Result<String, RemoteError> {
        let url = self.endpoint(&["content", &item.id])?;
        let parsed: VersionResponse = self.get_json(url, &[("expand", "version")]).await?;
        Ok(parsed.version.number.to_string())
    }

    /// Optimistic concurrency: refuse to act on an item edited since selection.
    async fn ensure_revision(&self, item: &CandidateItem) -> Result<(), RemoteError> {
        let Some(expected) = item.revision.as_deref() else {
            return Ok(());
        };
        let current = self.current_version(item).await?;
        if current != expected {
            return Err(RemoteError::new(
                ErrorKind::Conflict,
                format!(
                    "item {} changed since selection (revision {} -> {})",
                    item.id, expected, current
                ),
            ));
        }
        Ok(())
    }

    fn restriction_url(
        &self,
        item: &CandidateItem,
        operation: &str,
        principal: &Principal,
    ) -> Result<(Url, Vec<(&'static str, String)>), RemoteError> {
        match principal {
            Principal::User(account_id) => Ok((
                self.endpoint(&["content", &item.id, "restriction", "byOperation", operation, "user"])?,
                vec![("accountId", account_id.clone())],
            )),
            Principal::Group(name) => Ok((
                self.endpoint(&[
                    "content",
                    &item.id,
                    "restriction",
                    "byOperation",
                    operation,
                    "group",
                    name,
                ])?,
                Vec::new(),
            )),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn invalid_operation(err: BulkError) -> RemoteError {
    RemoteError::new(ErrorKind::Validation, err.to_string())
}

#[async_trait]
impl Transport for ConfluenceClient {
    async fn search(&self, request: &PageRequest) -> Result<Page, RemoteError> {
        let url = self.endpoint(&["content", "search"])?;
        let limit = request.limit.to_string();
        let mut query = vec![
            ("cql", request.cql.as_str()),
            ("limit", limit.as_str()),
            ("expand", "version"),
        ];
        if let Some(cursor) = request.cursor.as_deref() {
            query.push(("cursor", cursor));
        }
        let parsed: SearchResponse = self.get_json(url, &query).await?;
        let items = parsed
            .results
            .into_iter()
            .map(|r| CandidateItem {
                id: r.id,
                kind: r.content_type,
                display_name: r.title,
                revision: r.version.map(|v| v.number.to_string()),
            })
            .collect();
        let next_cursor = parsed.links.next.as_deref().and_then(cursor_from_next_link);
        Ok(Page { items, next_cursor })
    }

    async fn snapshot(
        &self,
        item: &CandidateItem,
        aspect: SnapshotAspect,
    ) -> Result<ItemSnapshot, RemoteError> {
        let mut snapshot = ItemSnapshot::default();
        match aspect {
            SnapshotAspect::Labels => {
                let url = self.endpoint(&["content", &item.id, "label"])?;
                let parsed: LabelList = self.get_json(url, &[("limit", LABEL_PAGE_LIMIT)]).await?;
                snapshot.labels = parsed.results.into_iter().map(|l| l.name).collect();
            }
            SnapshotAspect::Parent => {
                let url = self.endpoint(&["content", &item.id])?;
                let parsed: AncestorsResponse =
                    self.get_json(url, &[("expand", "ancestors")]).await?;
                snapshot.parent_id = parsed.ancestors.last().map(|a| a.id.clone());
            }
            SnapshotAspect::Restrictions => {
                let url = self.endpoint(&["content", &item.id, "restriction", "byOperation"])?;
                // Response also carries `_links`; only the operation entries matter.
                let mut parsed: BTreeMap<String, serde_json::Value> = self
                    .get_json(
                        url,
                        &[("expand", "restrictions.user,restrictions.group")],
                    )
                    .await?;
                for operation in ["read", "update"] {
                    let Some(raw) = parsed.remove(operation) else {
                        continue;
                    };
                    let entry: OperationRestrictions = serde_json::from_value(raw).map_err(|e| {
                        RemoteError::new(
                            ErrorKind::Server,
                            format!("Malformed restriction response: {}", e),
                        )
                    })?;
                    let mut keys = BTreeSet::new();
                    if let Some(users) = entry.restrictions.user {
                        keys.extend(users.results.into_iter().map(|u| format!("user:{}", u.account_id)));
                    }
                    if let Some(groups) = entry.restrictions.group {
                        keys.extend(groups.results.into_iter().map(|g| format!("group:{}", g.name)));
                    }
                    snapshot.restrictions.insert(operation.to_string(), keys);
                }
            }
        }
        Ok(snapshot)
    }

    async fn mutate(
        &self,
        item: &CandidateItem,
        operation: &OperationDescriptor,
    ) -> Result<(), RemoteError> {
        match operation.kind {
            OperationKind::LabelAdd => {
                let label = operation.label().map_err(invalid_operation)?;
                let url = self.endpoint(&["content", &item.id, "label"])?;
                let body = json!([{ "prefix": "global", "name": label }]);
                self.send(self.request(Method::POST, url).json(&body)).await?;
            }
            OperationKind::LabelRemove => {
                let label = operation.label().map_err(invalid_operation)?;
                let url = self.endpoint(&["content", &item.id, "label"])?;
                self.send(self.request(Method::DELETE, url).query(&[("name", label)]))
                    .await?;
            }
            OperationKind::Move => {
                let target = operation.target().map_err(invalid_operation)?;
                let url = self.endpoint(&["content", &item.id, "move", "append", target])?;
                self.send(self.request(Method::PUT, url)).await?;
            }
            OperationKind::Delete => {
                self.ensure_revision(item).await?;
                let url = self.endpoint(&["content", &item.id])?;
                self.send(self.request(Method::DELETE, url)).await?;
            }
            OperationKind::PermissionAdd | OperationKind::PermissionRemove => {
                let restriction = operation.restriction_operation().map_err(invalid_operation)?;
                let principal = operation.principal().map_err(invalid_operation)?;
                let (url, query) = self.restriction_url(item, restriction.as_str(), &principal)?;
                let method = if operation.kind == OperationKind::PermissionAdd {
                    Method::PUT
                } else {
                    Method::DELETE
                };
                self.send(self.request(method, url).query(&query)).await?;
            }
            OperationKind::Export => {
                return Err(RemoteError::new(
                    ErrorKind::Validation,
                    "export is not a mutating operation",
                ));
            }
        }
        Ok(())
    }

    async fn fetch_body(&self, item: &CandidateItem) -> Result<String, RemoteError> {
        let url = self.endpoint(&["content", &item.id])?;
        let parsed: BodyResponse = self.get_json(url, &[("expand", "body.storage")]).await?;
        Ok(parsed.body.storage.value)
    }
}
