//! Approval workflow engine
//!
//! An [`Engine`] is bound to one workflow type and at most one workflow
//! instance. Build it with [`Engine::create`] to start a new case or
//! [`Engine::open`] to act on an existing one, stage form data, then call
//! [`Engine::initiate`] or [`Engine::examine_approve`].
//!
//! Each transition runs in its own store transaction. The engine's view of
//! the instance is only updated after that transaction commits.

use super::actions::ActionContext;
use super::context::{CurrentUser, WorkflowRuntime};
use super::form::FormData;
use super::serials;
use crate::error::{EngineError, Result};
use crate::store::Transaction;
use chrono::{Local, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use workflow_types::{
    ExamineAction, User, UserId, Workflow, WorkflowId, WorkflowNode, WorkflowOperator,
    WorkflowStatus, WorkflowType, WorkflowTypeId,
};

/// State produced by a transition, applied to the engine after commit
struct Transition {
    workflow: Workflow,
    node: Option<WorkflowNode>,
    operators: Vec<WorkflowOperator>,
}

/// Drives one approval case through its template
pub struct Engine {
    runtime: WorkflowRuntime,
    ctx: Arc<dyn CurrentUser>,
    workflow_type: WorkflowType,
    workflow: Option<Workflow>,
    /// Template node the instance currently sits on
    node: Option<WorkflowNode>,
    /// Operators of the current node
    operators: Vec<WorkflowOperator>,
    form: FormData,
}

impl Engine {
    /// Engine for a new case of the given type. Nothing is written until `initiate`.
    pub async fn create(
        runtime: &WorkflowRuntime,
        ctx: Arc<dyn CurrentUser>,
        type_id: WorkflowTypeId,
    ) -> Result<Self> {
        let mut tx = runtime.store().begin().await?;
        let workflow_type = tx
            .get_type(type_id)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowTypeNotExist))?;
        tx.rollback().await?;

        Ok(Self::bind(runtime, ctx, workflow_type))
    }

    /// Same as [`Engine::create`] with the type looked up by its unique key
    pub async fn create_by_only_name(
        runtime: &WorkflowRuntime,
        ctx: Arc<dyn CurrentUser>,
        only_name: &str,
    ) -> Result<Self> {
        let mut tx = runtime.store().begin().await?;
        let workflow_type = tx
            .get_type_by_only_name(only_name)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowTypeNotExist))?;
        tx.rollback().await?;

        Ok(Self::bind(runtime, ctx, workflow_type))
    }

    /// Engine for an existing case
    pub async fn open(
        runtime: &WorkflowRuntime,
        ctx: Arc<dyn CurrentUser>,
        workflow_id: WorkflowId,
    ) -> Result<Self> {
        let mut tx = runtime.store().begin().await?;
        let workflow = tx
            .get_workflow(workflow_id)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowNotExist))?;
        let workflow_type = tx
            .get_type(workflow.type_id)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowTypeNotExist))?;
        let operators = tx.list_operators(workflow.id, workflow.node).await?;
        let node = if workflow.node > 0 {
            Some(
                tx.get_node(workflow.type_id, workflow.node)
                    .await
                    .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowNodeNotExist))?,
            )
        } else {
            None
        };
        tx.rollback().await?;

        log::debug!(
            "Opened workflow {} ({}) at node {} with {} operators",
            workflow.id,
            workflow.status,
            workflow.node,
            operators.len()
        );

        let mut engine = Self::bind(runtime, ctx, workflow_type);
        engine.workflow = Some(workflow);
        engine.node = node;
        engine.operators = operators;
        Ok(engine)
    }

    fn bind(
        runtime: &WorkflowRuntime,
        ctx: Arc<dyn CurrentUser>,
        workflow_type: WorkflowType,
    ) -> Self {
        Self {
            runtime: runtime.clone(),
            ctx,
            workflow_type,
            workflow: None,
            node: None,
            operators: Vec::new(),
            form: FormData::new(),
        }
    }

    /// Replace all staged form data
    pub fn set_form_data(&mut self, data: HashMap<String, Value>) {
        self.form = FormData::from(data);
    }

    /// Stage a single form field
    pub fn set_form_data_field(&mut self, key: impl Into<String>, value: Value) {
        self.form.set(key, value);
    }

    pub fn form_data(&self) -> &FormData {
        &self.form
    }

    pub fn workflow_type(&self) -> &WorkflowType {
        &self.workflow_type
    }

    /// The instance, once initiated or opened
    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref()
    }

    /// Template node the instance currently sits on
    pub fn current_node(&self) -> Option<&WorkflowNode> {
        self.node.as_ref()
    }

    /// Operators assigned to the current node
    pub fn operators(&self) -> &[WorkflowOperator] {
        &self.operators
    }

    /// True when the instance is voided or completed
    pub fn is_end(&self) -> bool {
        self.workflow.as_ref().map(|w| w.status.is_end()).unwrap_or(false)
    }

    /// True when `user_id` is assigned to the current node and has not acted yet
    pub fn is_operator(&self, user_id: UserId) -> bool {
        self.operators.iter().any(|o| o.user_id == user_id && !o.handled)
    }

    fn current_user(&self) -> Result<User> {
        self.ctx.current_user().ok_or(EngineError::NotLoggedIn)
    }

    fn default_title(&self) -> String {
        self.runtime.options().render_title(&self.workflow_type.name)
    }

    /// Node following the current one, `None` when the instance should complete
    pub async fn next_node(&self) -> Result<Option<WorkflowNode>> {
        let current = self.workflow.as_ref().map(|w| w.node).unwrap_or(0);
        let mut tx = self.runtime.store().begin().await?;
        let next = next_node_in(tx.as_mut(), self.workflow_type.id, current).await?;
        tx.rollback().await?;
        Ok(next)
    }

    /// First node of the template
    pub async fn first_node(&self) -> Result<WorkflowNode> {
        let mut tx = self.runtime.store().begin().await?;
        let first = first_node_in(tx.as_mut(), self.workflow_type.id).await;
        tx.rollback().await?;
        first
    }

    /// Serial a workflow initiated now would receive
    pub async fn generate_serials(&self) -> Result<String> {
        let mut tx = self.runtime.store().begin().await?;
        let serial = serials::generate_serials(tx.as_mut(), Local::now()).await;
        tx.rollback().await?;
        serial
    }

    /// True when `user_id` approving the current node would leave it waiting on others
    pub async fn multiple_operator(&self, user_id: UserId) -> Result<bool> {
        let workflow = self.workflow.as_ref().ok_or(EngineError::WorkflowEngineNotStarted)?;
        let Some(node) = self.node.as_ref() else {
            return Ok(false);
        };
        let mut tx = self.runtime.store().begin().await?;
        let waiting = multiple_operator_in(tx.as_mut(), workflow, node, user_id).await;
        tx.rollback().await?;
        waiting
    }

    /// Users eligible to act on `node` for this instance
    pub async fn get_operator(&self, node: &WorkflowNode) -> Result<Vec<User>> {
        let workflow = self.workflow.as_ref().ok_or(EngineError::WorkflowEngineNotStarted)?;
        let user = self.current_user()?;
        let mut tx = self.runtime.store().begin().await?;
        let users = self.resolve_operators(tx.as_mut(), workflow, node, &user).await?;
        tx.rollback().await?;
        Ok(users)
    }

    /// Start the case: none -> Running, or Completed for a type without nodes
    pub async fn initiate(&mut self) -> Result<()> {
        if self.workflow.is_some() {
            return Err(EngineError::WorkflowEngineAlreadyStarted);
        }
        let user = self.current_user()?;

        let mut tx = self.runtime.store().begin().await?;
        let result = self.initiate_in(tx.as_mut(), &user).await;
        let transition = finish(tx, result).await?;

        log::info!(
            "User {} initiated workflow {} [{}] of type '{}': {} at node {}",
            user.id,
            transition.workflow.id,
            transition.workflow.serials,
            self.workflow_type.only_name,
            transition.workflow.status,
            transition.workflow.node
        );
        self.apply(transition);
        Ok(())
    }

    async fn initiate_in(&self, tx: &mut dyn Transaction, user: &User) -> Result<Transition> {
        // Step 1: Serial number
        let serials = serials::generate_serials(tx, Local::now()).await?;

        // Step 2: Main record
        let title = match self.form.title()? {
            Some(title) => title,
            None => self.default_title(),
        };
        let first = tx
            .next_node(self.workflow_type.id, 0)
            .await
            .map_err(|e| EngineError::WorkflowEngineSaveMainDataFail(e.to_string()))?;
        let (status, node) = match &first {
            Some(first) => (WorkflowStatus::Running, first.node),
            None => (WorkflowStatus::Completed, 0),
        };
        let now = Utc::now();
        let mut workflow = Workflow {
            id: WorkflowId::new(0),
            type_id: self.workflow_type.id,
            type_name: self.workflow_type.name.clone(),
            serials,
            title,
            promoter: user.id,
            status,
            node,
            submit_num: 1,
            created_at: now,
            updated_at: now,
        };
        workflow.id = tx
            .insert_workflow(&workflow)
            .await
            .map_err(|e| EngineError::WorkflowEngineSaveMainDataFail(e.to_string()))?;

        // Step 3: Operators of the first node
        let operators = match &first {
            Some(first) => self.assign_operators(tx, &workflow, first, user).await?,
            None => Vec::new(),
        };

        Ok(Transition {
            workflow,
            node: first,
            operators,
        })
    }

    /// Act on the current node according to the staged `action` (default `next`)
    pub async fn examine_approve(&mut self) -> Result<()> {
        let workflow = self.workflow.clone().ok_or(EngineError::WorkflowEngineNotStarted)?;
        let user = self.current_user()?;
        if workflow.status.is_end() {
            log::warn!(
                "User {} tried to examine workflow {} which is already {}",
                user.id,
                workflow.id,
                workflow.status
            );
            return Err(EngineError::WorkflowEngineEnded);
        }
        let action = self.form.action()?;
        let previous = (workflow.status, workflow.node);

        let mut tx = self.runtime.store().begin().await?;
        let result = match action {
            ExamineAction::Next => self.approve_in(tx.as_mut(), workflow, &user).await,
            ExamineAction::Overrule => self.overrule_in(tx.as_mut(), workflow, &user).await,
            ExamineAction::Cancel => self.cancel_in(tx.as_mut(), workflow).await,
        };
        let transition = finish(tx, result).await?;

        log::info!(
            "User {} examined workflow {} with '{}': {} at node {} -> {} at node {}",
            user.id,
            transition.workflow.id,
            action,
            previous.0,
            previous.1,
            transition.workflow.status,
            transition.workflow.node
        );
        self.apply(transition);
        Ok(())
    }

    async fn approve_in(
        &self,
        tx: &mut dyn Transaction,
        mut workflow: Workflow,
        user: &User,
    ) -> Result<Transition> {
        let current = tx
            .get_node(workflow.type_id, workflow.node)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowNodeNotExist))?;
        workflow.updated_at = Utc::now();

        if multiple_operator_in(tx, &workflow, &current, user.id).await? {
            // Others still have to act: record this approval and stay put
            let handled = tx
                .mark_handled(workflow.id, current.node, user.id)
                .await
                .map_err(|e| EngineError::WorkflowEngineOperatorHandleFail(e.to_string()))?;
            if handled == 0 {
                log::warn!(
                    "User {} is not an operator of node {} in workflow {}",
                    user.id,
                    current.node,
                    workflow.id
                );
                return Err(EngineError::WorkflowEngineOperatorHandleFail(format!(
                    "user {} has no operator row on node {}",
                    user.id, current.node
                )));
            }
            save_workflow(tx, &workflow).await?;
            let operators = tx.list_operators(workflow.id, current.node).await?;
            log::debug!(
                "Workflow {} waits for remaining operators on node {}",
                workflow.id,
                current.node
            );
            return Ok(Transition {
                workflow,
                node: Some(current),
                operators,
            });
        }

        if workflow.status == WorkflowStatus::Overrule {
            workflow.submit_num += 1;
        }
        remove_operators(tx, workflow.id).await?;

        match next_node_in(tx, workflow.type_id, current.node).await? {
            None => {
                workflow.status = WorkflowStatus::Completed;
                workflow.node = 0;
                save_workflow(tx, &workflow).await?;
                Ok(Transition {
                    workflow,
                    node: None,
                    operators: Vec::new(),
                })
            }
            Some(next) => {
                workflow.status = WorkflowStatus::Running;
                workflow.node = next.node;
                save_workflow(tx, &workflow).await?;
                let operators = self.assign_operators(tx, &workflow, &next, user).await?;
                Ok(Transition {
                    workflow,
                    node: Some(next),
                    operators,
                })
            }
        }
    }

    async fn overrule_in(
        &self,
        tx: &mut dyn Transaction,
        mut workflow: Workflow,
        user: &User,
    ) -> Result<Transition> {
        // A zero or negative target means "back to the first node"
        let target = match self.form.jump_node()?.filter(|jump| *jump > 0) {
            Some(jump) => {
                if jump >= workflow.node {
                    return Err(EngineError::WorkflowEngineNodeJumpErr(format!(
                        "target node {} is not before current node {}",
                        jump, workflow.node
                    )));
                }
                tx.get_node(workflow.type_id, jump)
                    .await
                    .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowNodeNotExist))?
            }
            None => first_node_in(tx, workflow.type_id).await?,
        };

        workflow.status = WorkflowStatus::Overrule;
        workflow.node = target.node;
        workflow.updated_at = Utc::now();

        remove_operators(tx, workflow.id).await?;
        save_workflow(tx, &workflow).await?;
        let operators = self.assign_operators(tx, &workflow, &target, user).await?;

        Ok(Transition {
            workflow,
            node: Some(target),
            operators,
        })
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn Transaction,
        mut workflow: Workflow,
    ) -> Result<Transition> {
        workflow.status = WorkflowStatus::Voided;
        workflow.updated_at = Utc::now();

        remove_operators(tx, workflow.id).await?;
        save_workflow(tx, &workflow).await?;

        Ok(Transition {
            workflow,
            node: self.node.clone(),
            operators: Vec::new(),
        })
    }

    /// Resolve and persist the operators of `node`, returning the stored rows
    async fn assign_operators(
        &self,
        tx: &mut dyn Transaction,
        workflow: &Workflow,
        node: &WorkflowNode,
        user: &User,
    ) -> Result<Vec<WorkflowOperator>> {
        let users = self.resolve_operators(tx, workflow, node, user).await?;
        let rows: Vec<WorkflowOperator> = users
            .iter()
            .map(|u| WorkflowOperator::pending(workflow.id, node.node, u))
            .collect();
        tx.insert_operators(&rows)
            .await
            .map_err(|e| EngineError::WorkflowEngineSaveOperatorFail(e.to_string()))?;
        Ok(tx.list_operators(workflow.id, node.node).await?)
    }

    /// Explicit user ids win over the node action; the acting user is the fallback.
    async fn resolve_operators(
        &self,
        tx: &mut dyn Transaction,
        workflow: &Workflow,
        node: &WorkflowNode,
        user: &User,
    ) -> Result<Vec<User>> {
        let explicit = node
            .explicit_user_ids()
            .map_err(|e| EngineError::InvalidActionValue(format!("node {}: {}", node.node, e)))?;

        let mut users = Vec::new();
        if let Some(ids) = explicit {
            for id in ids {
                let found = tx
                    .get_user(id)
                    .await
                    .map_err(|e| EngineError::from_lookup(e, EngineError::UserNotExist))?;
                users.push(found);
            }
        } else if let Some(key) = node.action_key() {
            let action = self.runtime.actions().get_action(key)?;
            let ctx = ActionContext {
                workflow_type: &self.workflow_type,
                workflow,
                node,
                current_user: user,
            };
            users = action.resolve_operators(&ctx, tx).await?;
        }

        let mut seen = HashSet::new();
        users.retain(|u| seen.insert(u.id));
        if users.is_empty() {
            users.push(user.clone());
        }

        log::debug!(
            "Resolved {} operators for node {} of workflow {}",
            users.len(),
            node.node,
            workflow.id
        );
        Ok(users)
    }

    fn apply(&mut self, transition: Transition) {
        self.workflow = Some(transition.workflow);
        self.node = transition.node;
        self.operators = transition.operators;
    }
}

/// Commit on success, roll back on failure
async fn finish(tx: Box<dyn Transaction>, result: Result<Transition>) -> Result<Transition> {
    match result {
        Ok(transition) => {
            tx.commit()
                .await
                .map_err(|e| EngineError::WorkflowEngineSaveMainDataFail(e.to_string()))?;
            Ok(transition)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                log::warn!("Rollback failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

async fn next_node_in(
    tx: &mut dyn Transaction,
    type_id: WorkflowTypeId,
    current: i64,
) -> Result<Option<WorkflowNode>> {
    Ok(tx.next_node(type_id, current).await?)
}

async fn first_node_in(tx: &mut dyn Transaction, type_id: WorkflowTypeId) -> Result<WorkflowNode> {
    next_node_in(tx, type_id, 0)
        .await?
        .ok_or(EngineError::WorkflowEngineNoFirstNodeSet)
}

/// The node only waits when it needs everyone and someone besides `user_id` has not acted
async fn multiple_operator_in(
    tx: &mut dyn Transaction,
    workflow: &Workflow,
    node: &WorkflowNode,
    user_id: UserId,
) -> Result<bool> {
    if !node.everyone {
        return Ok(false);
    }
    let operators = tx.list_operators(workflow.id, node.node).await?;
    Ok(operators.iter().any(|o| o.user_id != user_id && !o.handled))
}

async fn save_workflow(tx: &mut dyn Transaction, workflow: &Workflow) -> Result<()> {
    tx.update_workflow(workflow)
        .await
        .map_err(|e| EngineError::WorkflowEngineSaveMainDataFail(e.to_string()))
}

async fn remove_operators(tx: &mut dyn Transaction, workflow_id: WorkflowId) -> Result<()> {
    tx.delete_operators(workflow_id)
        .await
        .map_err(|e| EngineError::WorkflowEngineRemoveOperatorFail(e.to_string()))?;
    Ok(())
}
