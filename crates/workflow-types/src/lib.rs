//! Shared types for the approval workflow engine
//!
//! Template model (`WorkflowType`, `WorkflowNode`), instance model
//! (`Workflow`, `WorkflowOperator`) and the user read model consulted by
//! operator resolution.

pub mod modifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use modifier::Modifier;

/// Form field holding the instance title (used by `initiate`)
pub const FORM_TITLE: &str = "title";
/// Form field holding the examine action (used by `examine_approve`)
pub const FORM_ACTION: &str = "action";
/// Form field holding the overrule target node sequence
pub const FORM_JUMP_NODE: &str = "jump_node";

/// Strongly typed UserId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed WorkflowId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(i64);

impl WorkflowId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed WorkflowTypeId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowTypeId(i64);

impl WorkflowTypeId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for WorkflowTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role bits stored in `User::role`
pub mod role {
    pub const SUPER_ADMIN: u32 = 1 << 0;
    pub const MEMBER: u32 = 1 << 1;
}

/// State bits stored in `User::state`
pub mod user_state {
    pub const DISABLED: u32 = 1 << 0;
}

/// Approval pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowType {
    pub id: WorkflowTypeId,
    pub name: String,
    /// Globally unique key
    pub only_name: String,
    pub org_id: Option<i64>,
    /// Built-in type as opposed to user defined
    pub system: bool,
}

/// One ordered step of a `WorkflowType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: i64,
    pub type_id: WorkflowTypeId,
    /// Positive sequence number, unique per type. Gaps are allowed.
    pub node: i64,
    pub name: String,
    /// Action registry key
    pub action: Option<String>,
    /// JSON array of explicit user ids; wins over `action`
    pub action_value: Option<String>,
    /// Every resolved operator must act before the instance advances
    pub everyone: bool,
}

impl WorkflowNode {
    /// Parse `action_value` into user ids. `Ok(None)` when the field is unset or blank.
    pub fn explicit_user_ids(&self) -> Result<Option<Vec<UserId>>, serde_json::Error> {
        match self.action_value.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => {
                let ids: Vec<i64> = serde_json::from_str(raw)?;
                if ids.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(ids.into_iter().map(UserId::new).collect()))
                }
            }
        }
    }

    /// Registry key, if set and non-blank
    pub fn action_key(&self) -> Option<&str> {
        self.action.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }
}

/// Instance status. Discriminants are the persisted codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Voided = 0,
    Completed = 1,
    Running = 2,
    Overrule = 3,
}

impl WorkflowStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Terminal states accept no further transitions
    pub fn is_end(&self) -> bool {
        matches!(self, Self::Voided | Self::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Voided => "voided",
            Self::Completed => "completed",
            Self::Running => "running",
            Self::Overrule => "overrule",
        }
    }
}

impl TryFrom<i32> for WorkflowStatus {
    type Error = TypeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Voided),
            1 => Ok(Self::Completed),
            2 => Ok(Self::Running),
            3 => Ok(Self::Overrule),
            other => Err(TypeError::UnknownStatus(other)),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One running or finished approval case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub type_id: WorkflowTypeId,
    /// Snapshot of the type name at creation
    pub type_name: String,
    pub serials: String,
    pub title: String,
    pub promoter: UserId,
    pub status: WorkflowStatus,
    /// Current node sequence; 0 when completed
    pub node: i64,
    pub submit_num: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user assigned to act on the current node of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOperator {
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub node: i64,
    pub user_id: UserId,
    /// Snapshot of the user's nickname
    pub nickname: String,
    pub handled: bool,
}

impl WorkflowOperator {
    /// Unsaved operator row for `user` on `node`
    pub fn pending(workflow_id: WorkflowId, node: i64, user: &User) -> Self {
        Self {
            id: 0,
            workflow_id,
            node,
            user_id: user.id,
            nickname: user.nickname.clone(),
            handled: false,
        }
    }
}

/// Read model of an application user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub nickname: String,
    /// Bits from [`role`]
    pub role: u32,
    /// Bits from [`user_state`]
    pub state: u32,
}

impl User {
    pub fn new(id: i64, username: &str, nickname: &str) -> Self {
        Self {
            id: UserId::new(id),
            username: username.to_string(),
            nickname: nickname.to_string(),
            role: role::MEMBER,
            state: 0,
        }
    }

    pub fn with_role(mut self, bits: u32) -> Self {
        self.role = self.role.attach(bits);
        self
    }

    pub fn with_state(mut self, bits: u32) -> Self {
        self.state = self.state.attach(bits);
        self
    }

    pub fn is_active(&self) -> bool {
        !self.state.exists(user_state::DISABLED)
    }

    pub fn is_active_super_admin(&self) -> bool {
        self.role.exists(role::SUPER_ADMIN) && self.is_active()
    }
}

/// Decision taken by `examine_approve`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamineAction {
    /// Approve and advance
    Next,
    /// Reject back to an earlier node
    Overrule,
    /// Void the case
    Cancel,
}

impl ExamineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Overrule => "overrule",
            Self::Cancel => "cancel",
        }
    }
}

impl Default for ExamineAction {
    fn default() -> Self {
        Self::Next
    }
}

impl FromStr for ExamineAction {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "next" => Ok(Self::Next),
            "overrule" => Ok(Self::Overrule),
            "cancel" => Ok(Self::Cancel),
            other => Err(TypeError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for ExamineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importable template document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub only_name: String,
    #[serde(default)]
    pub org_id: Option<i64>,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// Node entry of a [`TemplateSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node: i64,
    pub name: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub action_value: Option<Vec<i64>>,
    #[serde(default)]
    pub everyone: bool,
}

/// Conversion errors for the shared types
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("Unknown workflow status code: {0}")]
    UnknownStatus(i32),

    #[error("Unknown examine action: {0}")]
    UnknownAction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(action: Option<&str>, action_value: Option<&str>) -> WorkflowNode {
        WorkflowNode {
            id: 1,
            type_id: WorkflowTypeId::new(1),
            node: 1,
            name: "manager".to_string(),
            action: action.map(str::to_string),
            action_value: action_value.map(str::to_string),
            everyone: false,
        }
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            WorkflowStatus::Voided,
            WorkflowStatus::Completed,
            WorkflowStatus::Running,
            WorkflowStatus::Overrule,
        ] {
            assert_eq!(WorkflowStatus::try_from(status.code()).unwrap(), status);
        }
        assert!(WorkflowStatus::try_from(7).is_err());
    }

    #[test]
    fn test_status_is_end() {
        assert!(WorkflowStatus::Voided.is_end());
        assert!(WorkflowStatus::Completed.is_end());
        assert!(!WorkflowStatus::Running.is_end());
        assert!(!WorkflowStatus::Overrule.is_end());
    }

    #[test]
    fn test_examine_action_parsing() {
        assert_eq!("next".parse::<ExamineAction>().unwrap(), ExamineAction::Next);
        assert_eq!(" overrule ".parse::<ExamineAction>().unwrap(), ExamineAction::Overrule);
        assert_eq!("cancel".parse::<ExamineAction>().unwrap(), ExamineAction::Cancel);
        assert!("approve".parse::<ExamineAction>().is_err());
        assert_eq!(ExamineAction::default(), ExamineAction::Next);
    }

    #[test]
    fn test_explicit_user_ids() {
        let ids = node_with(None, Some("[5, 9]")).explicit_user_ids().unwrap();
        assert_eq!(ids, Some(vec![UserId::new(5), UserId::new(9)]));

        assert_eq!(node_with(None, None).explicit_user_ids().unwrap(), None);
        assert_eq!(node_with(None, Some("  ")).explicit_user_ids().unwrap(), None);
        assert_eq!(node_with(None, Some("[]")).explicit_user_ids().unwrap(), None);
        assert!(node_with(None, Some("five")).explicit_user_ids().is_err());
    }

    #[test]
    fn test_action_key_ignores_blank() {
        assert_eq!(node_with(Some("initiator"), None).action_key(), Some("initiator"));
        assert_eq!(node_with(Some(" "), None).action_key(), None);
        assert_eq!(node_with(None, None).action_key(), None);
    }

    #[test]
    fn test_active_super_admin() {
        let admin = User::new(1, "root", "Root").with_role(role::SUPER_ADMIN);
        assert!(admin.is_active_super_admin());

        let disabled = admin.clone().with_state(user_state::DISABLED);
        assert!(!disabled.is_active_super_admin());

        let member = User::new(2, "bob", "Bob");
        assert!(!member.is_active_super_admin());
    }

    #[test]
    fn test_template_spec_defaults() {
        let spec: TemplateSpec = serde_json::from_str(
            r#"{"name": "Leave", "only_name": "leave", "nodes": [{"node": 1, "name": "manager"}]}"#,
        )
        .unwrap();
        assert!(!spec.system);
        assert_eq!(spec.org_id, None);
        assert_eq!(spec.nodes.len(), 1);
        assert!(!spec.nodes[0].everyone);
        assert!(spec.nodes[0].action_value.is_none());
    }
}
