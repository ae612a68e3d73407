//! Node action registry
//!
//! A node names an action key; the registered handler decides who may act
//! on that node. The registry is built once at startup and handed to the
//! engine through [`WorkflowRuntime`](super::WorkflowRuntime).

use crate::error::{EngineError, Result};
use crate::store::Transaction;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use workflow_types::{User, Workflow, WorkflowNode, WorkflowType};

/// Key of the built-in action resolving all active super admins
pub const ACTION_ADMINISTRATORS: &str = "administrators";
/// Key of the built-in action resolving the workflow promoter
pub const ACTION_INITIATOR: &str = "initiator";

/// Engine state visible to a node action
pub struct ActionContext<'a> {
    pub workflow_type: &'a WorkflowType,
    pub workflow: &'a Workflow,
    /// Node whose operators are being resolved
    pub node: &'a WorkflowNode,
    pub current_user: &'a User,
}

/// Strategy computing the eligible operators of a node
#[async_trait]
pub trait NodeAction: Send + Sync {
    /// Human readable label for UI enumeration
    fn label(&self) -> &str;

    /// Ordered list of eligible users. Runs inside the engine's transaction.
    async fn resolve_operators(
        &self,
        ctx: &ActionContext<'_>,
        tx: &mut dyn Transaction,
    ) -> Result<Vec<User>>;
}

/// Named registry of node actions
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn NodeAction>>,
}

impl ActionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `administrators` and `initiator` actions
    pub fn with_builtin_actions() -> Self {
        let mut registry = Self::new();
        registry.register_action(ACTION_ADMINISTRATORS, Arc::new(AdministratorsAction));
        registry.register_action(ACTION_INITIATOR, Arc::new(InitiatorAction));
        registry
    }

    /// Store `handler` under `key`. A handler already registered under the
    /// same key is replaced and returned.
    pub fn register_action(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn NodeAction>,
    ) -> Option<Arc<dyn NodeAction>> {
        let key = key.into();
        let previous = self.actions.insert(key.clone(), handler);
        if previous.is_some() {
            log::debug!("Node action '{}' replaced", key);
        }
        previous
    }

    pub fn get_action(&self, key: &str) -> Result<Arc<dyn NodeAction>> {
        self.actions
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::ActionNotRegistered(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    /// Key to label mapping, sorted by key
    pub fn get_all_action_name(&self) -> BTreeMap<String, String> {
        self.actions
            .iter()
            .map(|(key, action)| (key.clone(), action.label().to_string()))
            .collect()
    }
}

/// All active super admins
pub struct AdministratorsAction;

#[async_trait]
impl NodeAction for AdministratorsAction {
    fn label(&self) -> &str {
        "Administrators"
    }

    async fn resolve_operators(
        &self,
        _ctx: &ActionContext<'_>,
        tx: &mut dyn Transaction,
    ) -> Result<Vec<User>> {
        Ok(tx.list_super_admins().await?)
    }
}

/// The user who started the workflow
pub struct InitiatorAction;

#[async_trait]
impl NodeAction for InitiatorAction {
    fn label(&self) -> &str {
        "Initiator"
    }

    async fn resolve_operators(
        &self,
        ctx: &ActionContext<'_>,
        tx: &mut dyn Transaction,
    ) -> Result<Vec<User>> {
        let promoter = tx
            .get_user(ctx.workflow.promoter)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::UserNotExist))?;
        Ok(vec![promoter])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store, UserRepository};
    use chrono::Utc;
    use workflow_types::{role, user_state, UserId, WorkflowId, WorkflowStatus, WorkflowTypeId};

    struct FixedAction(&'static str, Vec<User>);

    #[async_trait]
    impl NodeAction for FixedAction {
        fn label(&self) -> &str {
            self.0
        }

        async fn resolve_operators(
            &self,
            _ctx: &ActionContext<'_>,
            _tx: &mut dyn Transaction,
        ) -> Result<Vec<User>> {
            Ok(self.1.clone())
        }
    }

    fn fixtures() -> (WorkflowType, Workflow, WorkflowNode) {
        let now = Utc::now();
        let workflow_type = WorkflowType {
            id: WorkflowTypeId::new(1),
            name: "Leave".to_string(),
            only_name: "leave".to_string(),
            org_id: None,
            system: true,
        };
        let workflow = Workflow {
            id: WorkflowId::new(1),
            type_id: workflow_type.id,
            type_name: workflow_type.name.clone(),
            serials: "202401011230001".to_string(),
            title: "Leave request".to_string(),
            promoter: UserId::new(7),
            status: WorkflowStatus::Running,
            node: 1,
            submit_num: 1,
            created_at: now,
            updated_at: now,
        };
        let node = WorkflowNode {
            id: 1,
            type_id: workflow_type.id,
            node: 1,
            name: "approve".to_string(),
            action: Some(ACTION_ADMINISTRATORS.to_string()),
            action_value: None,
            everyone: false,
        };
        (workflow_type, workflow, node)
    }

    #[test]
    fn test_get_unregistered_action_fails() {
        let registry = ActionRegistry::new();
        match registry.get_action("nobody") {
            Err(EngineError::ActionNotRegistered(key)) => assert_eq!(key, "nobody"),
            _ => panic!("expected ActionNotRegistered"),
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ActionRegistry::new();
        assert!(registry.register_action("lead", Arc::new(FixedAction("First", vec![]))).is_none());
        let replaced = registry.register_action("lead", Arc::new(FixedAction("Second", vec![])));
        assert!(replaced.is_some());

        assert_eq!(registry.get_action("lead").unwrap().label(), "Second");
        assert_eq!(registry.get_all_action_name().len(), 1);
    }

    #[test]
    fn test_builtin_action_names() {
        let names = ActionRegistry::with_builtin_actions().get_all_action_name();
        let keys: Vec<&str> = names.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![ACTION_ADMINISTRATORS, ACTION_INITIATOR]);
        assert_eq!(names[ACTION_INITIATOR], "Initiator");
    }

    #[tokio::test]
    async fn test_builtin_actions_resolve_users() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.put_user(&User::new(1, "root", "Root").with_role(role::SUPER_ADMIN)).await.unwrap();
        let disabled = User::new(2, "ops", "Ops")
            .with_role(role::SUPER_ADMIN)
            .with_state(user_state::DISABLED);
        tx.put_user(&disabled).await.unwrap();
        tx.put_user(&User::new(7, "amy", "Amy")).await.unwrap();

        let (workflow_type, workflow, node) = fixtures();
        let current_user = User::new(9, "zed", "Zed");
        let ctx = ActionContext {
            workflow_type: &workflow_type,
            workflow: &workflow,
            node: &node,
            current_user: &current_user,
        };

        let registry = ActionRegistry::with_builtin_actions();
        let admins = registry
            .get_action(ACTION_ADMINISTRATORS)
            .unwrap()
            .resolve_operators(&ctx, tx.as_mut())
            .await
            .unwrap();
        assert_eq!(admins.iter().map(|u| u.id.value()).collect::<Vec<_>>(), vec![1]);

        let initiator = registry
            .get_action(ACTION_INITIATOR)
            .unwrap()
            .resolve_operators(&ctx, tx.as_mut())
            .await
            .unwrap();
        assert_eq!(initiator.len(), 1);
        assert_eq!(initiator[0].nickname, "Amy");
    }
}
