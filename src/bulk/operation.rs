//! Operation descriptors: what a bulk run does to each candidate item.

use crate::error::BulkError;
use crate::transport::{ItemSnapshot, SnapshotAspect};
use crate::types::CandidateItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const PARAM_LABEL: &str = "label";
pub const PARAM_TARGET: &str = "target";
pub const PARAM_OPERATION: &str = "operation";
pub const PARAM_USER: &str = "user";
pub const PARAM_GROUP: &str = "group";
pub const PARAM_INCLUDE_BODY: &str = "include_body";

const MAX_LABEL_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    LabelAdd,
    LabelRemove,
    Move,
    Delete,
    PermissionAdd,
    PermissionRemove,
    Export,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::LabelAdd => "label-add",
            OperationKind::LabelRemove => "label-remove",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::PermissionAdd => "permission-add",
            OperationKind::PermissionRemove => "permission-remove",
            OperationKind::Export => "export",
        }
    }

    /// Whether the operation changes remote state.
    pub fn is_mutating(self) -> bool {
        !matches!(self, OperationKind::Export)
    }

    /// Whether a run may be checkpointed and resumed. Moves and deletes change
    /// the query's own result set, so a stored cursor would not be stable.
    pub fn is_resumable(self) -> bool {
        !matches!(self, OperationKind::Move | OperationKind::Delete)
    }

    /// Destructive operations always show a preview and require confirmation.
    pub fn is_destructive(self) -> bool {
        matches!(self, OperationKind::Delete | OperationKind::PermissionRemove)
    }

    /// Read-only state needed to detect a no-op during a dry run.
    pub fn lookup_aspect(self) -> Option<SnapshotAspect> {
        match self {
            OperationKind::LabelAdd | OperationKind::LabelRemove => Some(SnapshotAspect::Labels),
            OperationKind::Move => Some(SnapshotAspect::Parent),
            OperationKind::PermissionAdd | OperationKind::PermissionRemove => {
                Some(SnapshotAspect::Restrictions)
            }
            OperationKind::Delete | OperationKind::Export => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "label-add" => Ok(OperationKind::LabelAdd),
            "label-remove" => Ok(OperationKind::LabelRemove),
            "move" => Ok(OperationKind::Move),
            "delete" => Ok(OperationKind::Delete),
            "permission-add" => Ok(OperationKind::PermissionAdd),
            "permission-remove" => Ok(OperationKind::PermissionRemove),
            "export" => Ok(OperationKind::Export),
            other => Err(BulkError::Validation(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

/// Restriction operation a permission change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionOperation {
    Read,
    Update,
}

impl RestrictionOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            RestrictionOperation::Read => "read",
            RestrictionOperation::Update => "update",
        }
    }
}

impl FromStr for RestrictionOperation {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(RestrictionOperation::Read),
            "update" => Ok(RestrictionOperation::Update),
            other => Err(BulkError::Validation(format!(
                "permission operation must be 'read' or 'update', got '{}'",
                other
            ))),
        }
    }
}

/// Who a permission change targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(String),
    Group(String),
}

impl Principal {
    /// Key used in [`ItemSnapshot::restrictions`] entries.
    pub fn snapshot_key(&self) -> String {
        match self {
            Principal::User(id) => format!("user:{}", id),
            Principal::Group(name) => format!("group:{}", name),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "user {}", id),
            Principal::Group(name) => write!(f, "group {}", name),
        }
    }
}

/// Predicted effect of an operation on one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    WouldApply(String),
    NoOp(String),
}

/// Immutable description of a bulk operation for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub parameters: BTreeMap<String, String>,
    pub dry_run: bool,
    pub max_items: Option<u64>,
    pub batch_size: usize,
}

impl OperationDescriptor {
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_MUTATION_MAX_ITEMS: u64 = 100;

    pub fn new(kind: OperationKind) -> Self {
        let max_items = if kind.is_mutating() {
            Some(Self::DEFAULT_MUTATION_MAX_ITEMS)
        } else {
            None
        };
        Self {
            kind,
            parameters: BTreeMap::new(),
            dry_run: false,
            max_items,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_items(mut self, max_items: Option<u64>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<&str, BulkError> {
        match self.param(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(BulkError::Validation(format!(
                "{} requires parameter '{}'",
                self.kind, key
            ))),
        }
    }

    pub fn label(&self) -> Result<&str, BulkError> {
        self.required(PARAM_LABEL)
    }

    pub fn target(&self) -> Result<&str, BulkError> {
        self.required(PARAM_TARGET)
    }

    pub fn restriction_operation(&self) -> Result<RestrictionOperation, BulkError> {
        self.required(PARAM_OPERATION)?.parse()
    }

    pub fn principal(&self) -> Result<Principal, BulkError> {
        match (self.param(PARAM_USER), self.param(PARAM_GROUP)) {
            (Some(user), None) if !user.trim().is_empty() => Ok(Principal::User(user.to_string())),
            (None, Some(group)) if !group.trim().is_empty() => {
                Ok(Principal::Group(group.to_string()))
            }
            (Some(_), Some(_)) => Err(BulkError::Validation(format!(
                "{} takes either '{}' or '{}', not both",
                self.kind, PARAM_USER, PARAM_GROUP
            ))),
            _ => Err(BulkError::Validation(format!(
                "{} requires '{}' or '{}'",
                self.kind, PARAM_USER, PARAM_GROUP
            ))),
        }
    }

    pub fn include_body(&self) -> bool {
        self.param(PARAM_INCLUDE_BODY) == Some("true")
    }

    /// Validate parameters for the operation kind. Runs before any remote call.
    pub fn validate(&self) -> Result<(), BulkError> {
        if self.batch_size == 0 {
            return Err(BulkError::Validation(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.max_items == Some(0) {
            return Err(BulkError::Validation(
                "max items must be at least 1".to_string(),
            ));
        }
        match self.kind {
            OperationKind::LabelAdd | OperationKind::LabelRemove => {
                let label = self.label()?;
                if label.len() > MAX_LABEL_LEN {
                    return Err(BulkError::Validation(format!(
                        "label exceeds {} characters",
                        MAX_LABEL_LEN
                    )));
                }
                if label.chars().any(char::is_whitespace) {
                    return Err(BulkError::Validation(format!(
                        "label '{}' must not contain whitespace",
                        label
                    )));
                }
            }
            OperationKind::Move => {
                self.target()?;
            }
            OperationKind::PermissionAdd | OperationKind::PermissionRemove => {
                self.restriction_operation()?;
                self.principal()?;
            }
            OperationKind::Delete | OperationKind::Export => {}
        }
        Ok(())
    }

    /// Human-readable intended effect, e.g. "add label 'approved'".
    pub fn describe(&self) -> String {
        match self.kind {
            OperationKind::LabelAdd => format!("add label '{}'", self.param_or_blank(PARAM_LABEL)),
            OperationKind::LabelRemove => {
                format!("remove label '{}'", self.param_or_blank(PARAM_LABEL))
            }
            OperationKind::Move => format!("move under {}", self.param_or_blank(PARAM_TARGET)),
            OperationKind::Delete => "delete".to_string(),
            OperationKind::PermissionAdd => format!(
                "grant {} to {}",
                self.param_or_blank(PARAM_OPERATION),
                self.principal_or_blank()
            ),
            OperationKind::PermissionRemove => format!(
                "revoke {} from {}",
                self.param_or_blank(PARAM_OPERATION),
                self.principal_or_blank()
            ),
            OperationKind::Export => "export".to_string(),
        }
    }

    fn param_or_blank(&self, key: &str) -> &str {
        self.param(key).unwrap_or("")
    }

    fn principal_or_blank(&self) -> String {
        self.principal().map(|p| p.to_string()).unwrap_or_default()
    }

    /// Predict the effect on `item` given its current state. Without a
    /// snapshot the operation is assumed to apply.
    pub fn predict(&self, item: &CandidateItem, snapshot: Option<&ItemSnapshot>) -> Prediction {
        let would = || {
            Prediction::WouldApply(format!(
                "would {} on {} '{}'",
                self.describe(),
                item.kind,
                item.display_name
            ))
        };
        let Some(snapshot) = snapshot else {
            return would();
        };
        match self.kind {
            OperationKind::LabelAdd => {
                let label = self.param_or_blank(PARAM_LABEL);
                if snapshot.labels.contains(label) {
                    Prediction::NoOp(format!("label '{}' already present", label))
                } else {
                    would()
                }
            }
            OperationKind::LabelRemove => {
                let label = self.param_or_blank(PARAM_LABEL);
                if snapshot.labels.contains(label) {
                    would()
                } else {
                    Prediction::NoOp(format!("label '{}' not present", label))
                }
            }
            OperationKind::Move => {
                let target = self.param_or_blank(PARAM_TARGET);
                if snapshot.parent_id.as_deref() == Some(target) {
                    Prediction::NoOp(format!("already under {}", target))
                } else {
                    would()
                }
            }
            OperationKind::PermissionAdd | OperationKind::PermissionRemove => {
                let (Ok(operation), Ok(principal)) =
                    (self.restriction_operation(), self.principal())
                else {
                    return would();
                };
                let present = snapshot
                    .restrictions
                    .get(operation.as_str())
                    .map(|set| set.contains(&principal.snapshot_key()))
                    .unwrap_or(false);
                match (self.kind, present) {
                    (OperationKind::PermissionAdd, true) => {
                        Prediction::NoOp(format!("{} already has {}", principal, operation.as_str()))
                    }
                    (OperationKind::PermissionRemove, false) => {
                        Prediction::NoOp(format!("{} has no {}", principal, operation.as_str()))
                    }
                    _ => would(),
                }
            }
            OperationKind::Delete | OperationKind::Export => would(),
        }
    }

    /// Stable canonical form of the operation used in checkpoint signatures.
    pub fn signature_material(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}|{}", self.kind, params.join("&"))
    }
}
