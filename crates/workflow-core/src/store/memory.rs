//! In-memory storage backend
//!
//! Transactions run one at a time. `begin` waits until the previous
//! transaction has committed, rolled back or been dropped, then works on a
//! private copy of the tables that is swapped in on commit.
//!
//! A task must not open a second transaction while it still holds one.

use super::{
    Result, Store, StoreError, Transaction, UserRepository, WorkflowNodeRepository,
    WorkflowOperatorRepository, WorkflowRepository, WorkflowTypeRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use workflow_types::{
    User, UserId, Workflow, WorkflowId, WorkflowNode, WorkflowOperator, WorkflowType,
    WorkflowTypeId,
};

/// Store operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    NextNode,
    InsertWorkflow,
    UpdateWorkflow,
    InsertOperators,
    DeleteOperators,
    MarkHandled,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    types: BTreeMap<i64, WorkflowType>,
    nodes: BTreeMap<i64, WorkflowNode>,
    workflows: BTreeMap<i64, Workflow>,
    operators: BTreeMap<i64, WorkflowOperator>,
    users: BTreeMap<i64, User>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

/// In-memory storage backend
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    /// Held by the open transaction
    gate: Arc<AsyncMutex<()>>,
    failures: Arc<Mutex<HashSet<FailPoint>>>,
    commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later occurrence of `point` fail with a database error
    pub fn fail_on(&self, point: FailPoint) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(point);
        }
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Number of committed transactions so far
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.gate.clone().lock_owned().await;
        let working = self
            .tables
            .lock()
            .map_err(|e| StoreError::Database(format!("lock poisoned: {}", e)))?
            .clone();
        let failures = self
            .failures
            .lock()
            .map_err(|e| StoreError::Database(format!("lock poisoned: {}", e)))?
            .clone();

        Ok(Box::new(MemoryTransaction {
            shared: self.tables.clone(),
            commits: self.commits.clone(),
            working,
            failures,
            _guard: guard,
        }))
    }
}

/// Transaction over a private copy of the tables
pub struct MemoryTransaction {
    shared: Arc<Mutex<Tables>>,
    commits: Arc<AtomicUsize>,
    working: Tables,
    failures: HashSet<FailPoint>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn check(&self, point: FailPoint) -> Result<()> {
        if self.failures.contains(&point) {
            return Err(StoreError::Database(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowTypeRepository for MemoryTransaction {
    async fn get_type(&mut self, id: WorkflowTypeId) -> Result<WorkflowType> {
        self.working
            .types
            .get(&id.value())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow_type {}", id)))
    }

    async fn get_type_by_only_name(&mut self, only_name: &str) -> Result<WorkflowType> {
        self.working
            .types
            .values()
            .find(|t| t.only_name == only_name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow_type '{}'", only_name)))
    }

    async fn insert_type(&mut self, workflow_type: &WorkflowType) -> Result<WorkflowTypeId> {
        if self.working.types.values().any(|t| t.only_name == workflow_type.only_name) {
            return Err(StoreError::AlreadyExists(format!(
                "workflow_type '{}'",
                workflow_type.only_name
            )));
        }
        let id = self.working.next_id();
        let mut row = workflow_type.clone();
        row.id = WorkflowTypeId::new(id);
        self.working.types.insert(id, row);
        Ok(WorkflowTypeId::new(id))
    }
}

#[async_trait]
impl WorkflowNodeRepository for MemoryTransaction {
    async fn list_nodes(&mut self, type_id: WorkflowTypeId) -> Result<Vec<WorkflowNode>> {
        let mut nodes: Vec<WorkflowNode> = self
            .working
            .nodes
            .values()
            .filter(|n| n.type_id == type_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.node);
        Ok(nodes)
    }

    async fn get_node(&mut self, type_id: WorkflowTypeId, node: i64) -> Result<WorkflowNode> {
        self.working
            .nodes
            .values()
            .find(|n| n.type_id == type_id && n.node == node)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("workflow_node {} of type {}", node, type_id))
            })
    }

    async fn next_node(
        &mut self,
        type_id: WorkflowTypeId,
        after: i64,
    ) -> Result<Option<WorkflowNode>> {
        self.check(FailPoint::NextNode)?;
        Ok(self
            .working
            .nodes
            .values()
            .filter(|n| n.type_id == type_id && n.node > after)
            .min_by_key(|n| n.node)
            .cloned())
    }

    async fn insert_node(&mut self, node: &WorkflowNode) -> Result<i64> {
        if self
            .working
            .nodes
            .values()
            .any(|n| n.type_id == node.type_id && n.node == node.node)
        {
            return Err(StoreError::AlreadyExists(format!(
                "workflow_node {} of type {}",
                node.node, node.type_id
            )));
        }
        let id = self.working.next_id();
        let mut row = node.clone();
        row.id = id;
        self.working.nodes.insert(id, row);
        Ok(id)
    }
}

#[async_trait]
impl WorkflowRepository for MemoryTransaction {
    async fn get_workflow(&mut self, id: WorkflowId) -> Result<Workflow> {
        self.working
            .workflows
            .get(&id.value())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", id)))
    }

    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<WorkflowId> {
        self.check(FailPoint::InsertWorkflow)?;
        let id = self.working.next_id();
        let mut row = workflow.clone();
        row.id = WorkflowId::new(id);
        self.working.workflows.insert(id, row);
        Ok(WorkflowId::new(id))
    }

    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<()> {
        self.check(FailPoint::UpdateWorkflow)?;
        match self.working.workflows.get_mut(&workflow.id.value()) {
            Some(row) => {
                *row = workflow.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("workflow {}", workflow.id))),
        }
    }

    async fn count_workflows_since(&mut self, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .working
            .workflows
            .values()
            .filter(|w| w.created_at >= since)
            .count() as i64)
    }
}

#[async_trait]
impl WorkflowOperatorRepository for MemoryTransaction {
    async fn list_operators(
        &mut self,
        workflow_id: WorkflowId,
        node: i64,
    ) -> Result<Vec<WorkflowOperator>> {
        Ok(self
            .working
            .operators
            .values()
            .filter(|o| o.workflow_id == workflow_id && o.node == node)
            .cloned()
            .collect())
    }

    async fn insert_operators(&mut self, operators: &[WorkflowOperator]) -> Result<()> {
        self.check(FailPoint::InsertOperators)?;
        for operator in operators {
            let id = self.working.next_id();
            let mut row = operator.clone();
            row.id = id;
            self.working.operators.insert(id, row);
        }
        Ok(())
    }

    async fn delete_operators(&mut self, workflow_id: WorkflowId) -> Result<u64> {
        self.check(FailPoint::DeleteOperators)?;
        let before = self.working.operators.len();
        self.working.operators.retain(|_, o| o.workflow_id != workflow_id);
        Ok((before - self.working.operators.len()) as u64)
    }

    async fn mark_handled(
        &mut self,
        workflow_id: WorkflowId,
        node: i64,
        user_id: UserId,
    ) -> Result<u64> {
        self.check(FailPoint::MarkHandled)?;
        let mut updated = 0;
        for operator in self.working.operators.values_mut() {
            if operator.workflow_id == workflow_id
                && operator.node == node
                && operator.user_id == user_id
            {
                operator.handled = true;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl UserRepository for MemoryTransaction {
    async fn get_user(&mut self, id: UserId) -> Result<User> {
        self.working
            .users
            .get(&id.value())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    async fn list_super_admins(&mut self) -> Result<Vec<User>> {
        Ok(self
            .working
            .users
            .values()
            .filter(|u| u.is_active_super_admin())
            .cloned()
            .collect())
    }

    async fn put_user(&mut self, user: &User) -> Result<()> {
        self.working.users.insert(user.id.value(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.check(FailPoint::Commit)?;
        let this = *self;
        let mut shared = this
            .shared
            .lock()
            .map_err(|e| StoreError::Database(format!("lock poisoned: {}", e)))?;
        *shared = this.working;
        this.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::WorkflowStatus;

    fn workflow() -> Workflow {
        let now = Utc::now();
        Workflow {
            id: WorkflowId::new(0),
            type_id: WorkflowTypeId::new(1),
            type_name: "Leave".to_string(),
            serials: "x".to_string(),
            title: "t".to_string(),
            promoter: UserId::new(1),
            status: WorkflowStatus::Running,
            node: 1,
            submit_num: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_tables_untouched() {
        let store = MemoryStore::new();
        store.fail_on(FailPoint::InsertWorkflow);

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(tx.insert_workflow(&workflow()).await, Err(StoreError::Database(_))));
        drop(tx);

        store.clear_failures();
        let mut tx = store.begin().await.unwrap();
        let id = tx.insert_workflow(&workflow()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_workflow(id).await.unwrap().title, "t");
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_transactions_keep_both_writes() {
        let store = MemoryStore::new();
        let mut first = store.begin().await.unwrap();

        let other = store.clone();
        let second = tokio::spawn(async move {
            let mut tx = other.begin().await.unwrap();
            tx.put_user(&User::new(2, "b", "B")).await.unwrap();
            let id = tx.insert_workflow(&workflow()).await.unwrap();
            tx.commit().await.unwrap();
            id
        });

        // The second transaction waits for the first one to finish
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), store.begin())
                .await
                .is_err()
        );

        first.put_user(&User::new(1, "a", "A")).await.unwrap();
        let first_id = first.insert_workflow(&workflow()).await.unwrap();
        first.commit().await.unwrap();
        let second_id = second.await.unwrap();
        assert_ne!(first_id, second_id);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_user(UserId::new(1)).await.unwrap().username, "a");
        assert_eq!(tx.get_user(UserId::new(2)).await.unwrap().username, "b");
        assert!(tx.get_workflow(first_id).await.is_ok());
        assert!(tx.get_workflow(second_id).await.is_ok());
        assert_eq!(store.commits(), 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_store() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.put_user(&User::new(1, "a", "A")).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(tx.get_user(UserId::new(1)).await, Err(StoreError::NotFound(_))));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_commit_discards_writes() {
        let store = MemoryStore::new();
        store.fail_on(FailPoint::Commit);

        let mut tx = store.begin().await.unwrap();
        let id = tx.insert_workflow(&workflow()).await.unwrap();
        assert!(tx.commit().await.is_err());

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(tx.get_workflow(id).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.commits(), 0);
    }
}
