//! Core data types shared across the selector, executor and reporting layers.

use crate::error::{BulkError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a remote content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Page,
    Blogpost,
    Attachment,
    Comment,
    #[serde(other)]
    Unknown,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Page => "page",
            ItemKind::Blogpost => "blogpost",
            ItemKind::Attachment => "attachment",
            ItemKind::Comment => "comment",
            ItemKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "page" => Ok(ItemKind::Page),
            "blogpost" | "blog" => Ok(ItemKind::Blogpost),
            "attachment" => Ok(ItemKind::Attachment),
            "comment" => Ok(ItemKind::Comment),
            other => Err(BulkError::Validation(format!(
                "unknown content type '{}' (expected page, blogpost, attachment or comment)",
                other
            ))),
        }
    }
}

/// Optional hints narrowing a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub space: Option<String>,
    pub content_type: Option<ItemKind>,
    pub page_size: u32,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            space: None,
            content_type: None,
            page_size: Query::DEFAULT_PAGE_SIZE,
        }
    }
}

/// An opaque CQL predicate plus scope hints. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    cql: String,
    scope: Scope,
}

impl Query {
    pub const DEFAULT_PAGE_SIZE: u32 = 50;
    pub const MAX_PAGE_SIZE: u32 = 250;

    pub fn new(cql: impl Into<String>, scope: Scope) -> Self {
        Self {
            cql: cql.into(),
            scope,
        }
    }

    pub fn cql(&self) -> &str {
        &self.cql
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn page_size(&self) -> u32 {
        self.scope.page_size
    }

    /// Cheap local well-formedness checks. The remote service remains the
    /// authority on the predicate itself.
    pub fn validate(&self) -> Result<(), BulkError> {
        let cql = self.cql.trim();
        if cql.is_empty() {
            return Err(BulkError::Validation("query must not be empty".to_string()));
        }
        if self.scope.page_size == 0 || self.scope.page_size > Self::MAX_PAGE_SIZE {
            return Err(BulkError::Validation(format!(
                "page size must be between 1 and {}",
                Self::MAX_PAGE_SIZE
            )));
        }
        if let Some(space) = &self.scope.space {
            if space.trim().is_empty() || space.contains('"') {
                return Err(BulkError::Validation(format!(
                    "invalid space key '{}'",
                    space
                )));
            }
        }

        let mut depth: i64 = 0;
        let mut in_quotes = false;
        let mut escaped = false;
        for ch in cql.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_quotes => escaped = true,
                '"' => in_quotes = !in_quotes,
                '(' if !in_quotes => depth += 1,
                ')' if !in_quotes => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(BulkError::Validation(format!(
                            "unbalanced ')' in query: {}",
                            cql
                        )));
                    }
                }
                _ => {}
            }
        }
        if in_quotes {
            return Err(BulkError::Validation(format!(
                "unterminated string literal in query: {}",
                cql
            )));
        }
        if depth != 0 {
            return Err(BulkError::Validation(format!(
                "unbalanced '(' in query: {}",
                cql
            )));
        }
        Ok(())
    }

    /// Predicate sent to the remote service: the query unmodified, conjoined
    /// with scope hints when present.
    pub fn effective_cql(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(space) = &self.scope.space {
            clauses.push(format!("space = \"{}\"", space));
        }
        if let Some(kind) = self.scope.content_type {
            clauses.push(format!("type = {}", kind));
        }
        if clauses.is_empty() {
            self.cql.clone()
        } else {
            format!("({}) AND {}", self.cql, clauses.join(" AND "))
        }
    }
}

/// A remote resource matched by a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub kind: ItemKind,
    pub display_name: String,
    /// Opaque revision token for optimistic concurrency, when known.
    pub revision: Option<String>,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, kind: ItemKind, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: display_name.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Success => f.write_str("success"),
            ItemStatus::Failed => f.write_str("failed"),
            ItemStatus::Skipped => f.write_str("skipped"),
        }
    }
}

/// Outcome of processing one candidate item. Recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub display_name: String,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    /// True when the status is a dry-run prediction rather than a confirmed effect.
    pub predicted: bool,
    pub timestamp: DateTime<Utc>,
}

impl ItemResult {
    fn base(item: &CandidateItem, status: ItemStatus) -> Self {
        Self {
            item_id: item.id.clone(),
            display_name: item.display_name.clone(),
            kind: item.kind,
            status,
            error_kind: None,
            message: None,
            predicted: false,
            timestamp: Utc::now(),
        }
    }

    pub fn success(item: &CandidateItem, message: Option<String>) -> Self {
        Self {
            message,
            ..Self::base(item, ItemStatus::Success)
        }
    }

    pub fn skipped(item: &CandidateItem, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::base(item, ItemStatus::Skipped)
        }
    }

    pub fn failed(item: &CandidateItem, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind: Some(kind),
            message: Some(message.into()),
            ..Self::base(item, ItemStatus::Failed)
        }
    }

    pub fn predicted(mut self) -> Self {
        self.predicted = true;
        self
    }
}
