//! Workflow type and node administration

use super::context::WorkflowRuntime;
use crate::error::{EngineError, Result};
use crate::store::{StoreError, Transaction};
use workflow_types::{NodeSpec, TemplateSpec, WorkflowNode, WorkflowType, WorkflowTypeId};

/// Creates workflow types and their ordered nodes
pub struct TemplateAdmin {
    runtime: WorkflowRuntime,
}

impl TemplateAdmin {
    pub fn new(runtime: &WorkflowRuntime) -> Self {
        Self {
            runtime: runtime.clone(),
        }
    }

    pub async fn create_type(
        &self,
        name: &str,
        only_name: &str,
        org_id: Option<i64>,
        system: bool,
    ) -> Result<WorkflowType> {
        let mut tx = self.runtime.store().begin().await?;
        match create_type_in(tx.as_mut(), name, only_name, org_id, system).await {
            Ok(created) => {
                tx.commit().await?;
                log::info!("Created workflow type '{}' ({})", created.only_name, created.id);
                Ok(created)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    pub async fn add_node(&self, type_id: WorkflowTypeId, spec: &NodeSpec) -> Result<WorkflowNode> {
        let mut tx = self.runtime.store().begin().await?;
        match self.add_node_in(tx.as_mut(), type_id, spec).await {
            Ok(node) => {
                tx.commit().await?;
                log::info!("Added node {} '{}' to workflow type {}", node.node, node.name, type_id);
                Ok(node)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    /// Create a type with all its nodes; nothing is stored if any node is rejected
    pub async fn import(&self, spec: &TemplateSpec) -> Result<(WorkflowType, Vec<WorkflowNode>)> {
        let mut tx = self.runtime.store().begin().await?;
        let result = async {
            let created = create_type_in(
                tx.as_mut(),
                &spec.name,
                &spec.only_name,
                spec.org_id,
                spec.system,
            )
            .await?;
            let mut nodes = Vec::with_capacity(spec.nodes.len());
            for node in &spec.nodes {
                nodes.push(self.add_node_in(tx.as_mut(), created.id, node).await?);
            }
            Ok::<_, EngineError>((created, nodes))
        }
        .await;

        match result {
            Ok((created, nodes)) => {
                tx.commit().await?;
                log::info!(
                    "Imported workflow type '{}' ({}) with {} nodes",
                    created.only_name,
                    created.id,
                    nodes.len()
                );
                Ok((created, nodes))
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    /// Nodes of a type in sequence order
    pub async fn nodes(&self, type_id: WorkflowTypeId) -> Result<Vec<WorkflowNode>> {
        let mut tx = self.runtime.store().begin().await?;
        tx.get_type(type_id)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowTypeNotExist))?;
        let nodes = tx.list_nodes(type_id).await?;
        tx.rollback().await?;
        Ok(nodes)
    }

    async fn add_node_in(
        &self,
        tx: &mut dyn Transaction,
        type_id: WorkflowTypeId,
        spec: &NodeSpec,
    ) -> Result<WorkflowNode> {
        if spec.node <= 0 {
            return Err(EngineError::WorkflowNodeInvalid(format!(
                "node '{}' must have a positive sequence, got {}",
                spec.name, spec.node
            )));
        }
        let action = spec
            .action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        if let Some(key) = &action {
            if !self.runtime.actions().contains(key) {
                return Err(EngineError::ActionNotRegistered(key.clone()));
            }
        }
        tx.get_type(type_id)
            .await
            .map_err(|e| EngineError::from_lookup(e, EngineError::WorkflowTypeNotExist))?;

        let action_value = match &spec.action_value {
            Some(ids) if !ids.is_empty() => Some(
                serde_json::to_string(ids)
                    .map_err(|e| EngineError::InvalidActionValue(e.to_string()))?,
            ),
            _ => None,
        };
        let mut node = WorkflowNode {
            id: 0,
            type_id,
            node: spec.node,
            name: spec.name.clone(),
            action,
            action_value,
            everyone: spec.everyone,
        };
        node.id = tx.insert_node(&node).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => EngineError::WorkflowNodeDuplicate(format!(
                "type {} already has node {}",
                type_id, spec.node
            )),
            other => EngineError::from(other),
        })?;
        Ok(node)
    }
}

async fn create_type_in(
    tx: &mut dyn Transaction,
    name: &str,
    only_name: &str,
    org_id: Option<i64>,
    system: bool,
) -> Result<WorkflowType> {
    let mut workflow_type = WorkflowType {
        id: WorkflowTypeId::new(0),
        name: name.to_string(),
        only_name: only_name.to_string(),
        org_id,
        system,
    };
    workflow_type.id = tx.insert_type(&workflow_type).await.map_err(|e| match e {
        StoreError::AlreadyExists(_) => EngineError::WorkflowTypeDuplicate(only_name.to_string()),
        other => EngineError::from(other),
    })?;
    Ok(workflow_type)
}
