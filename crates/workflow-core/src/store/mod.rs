//! Storage backends for the approval engine
//!
//! This module provides the repository traits the engine consumes and two
//! implementations:
//! - `MemoryStore` - In-memory storage for tests and embedding
//! - `SqliteStore` - SQLite database through `sqlx`
//!
//! All access goes through a [`Transaction`] obtained from [`Store::begin`].
//! A transaction bundles one repository per entity; it is created fresh for
//! every engine call, committed with [`Transaction::commit`], and rolled back
//! when dropped without a commit.

mod memory;
mod sqlite;

pub use memory::{FailPoint, MemoryStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use workflow_types::{
    User, UserId, Workflow, WorkflowId, WorkflowNode, WorkflowOperator, WorkflowType,
    WorkflowTypeId,
};

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Workflow type (template) repository
#[async_trait]
pub trait WorkflowTypeRepository: Send {
    /// Get a type by id; `NotFound` if absent
    async fn get_type(&mut self, id: WorkflowTypeId) -> Result<WorkflowType>;

    /// Get a type by its unique key; `NotFound` if absent
    async fn get_type_by_only_name(&mut self, only_name: &str) -> Result<WorkflowType>;

    /// Insert a type, ignoring `id`; `AlreadyExists` on a duplicate `only_name`
    async fn insert_type(&mut self, workflow_type: &WorkflowType) -> Result<WorkflowTypeId>;
}

/// Workflow node (template step) repository
#[async_trait]
pub trait WorkflowNodeRepository: Send {
    /// All nodes of a type ordered by sequence
    async fn list_nodes(&mut self, type_id: WorkflowTypeId) -> Result<Vec<WorkflowNode>>;

    /// Node with the given sequence; `NotFound` if absent
    async fn get_node(&mut self, type_id: WorkflowTypeId, node: i64) -> Result<WorkflowNode>;

    /// Node with the smallest sequence strictly greater than `after`
    async fn next_node(
        &mut self,
        type_id: WorkflowTypeId,
        after: i64,
    ) -> Result<Option<WorkflowNode>>;

    /// Insert a node, ignoring `id`; `AlreadyExists` on a duplicate sequence
    async fn insert_node(&mut self, node: &WorkflowNode) -> Result<i64>;
}

/// Workflow instance repository
#[async_trait]
pub trait WorkflowRepository: Send {
    /// Get a workflow by id; `NotFound` if absent
    async fn get_workflow(&mut self, id: WorkflowId) -> Result<Workflow>;

    /// Insert a workflow, ignoring `id`
    async fn insert_workflow(&mut self, workflow: &Workflow) -> Result<WorkflowId>;

    /// Overwrite the mutable columns of an existing workflow
    async fn update_workflow(&mut self, workflow: &Workflow) -> Result<()>;

    /// Number of workflows created at or after `since`
    async fn count_workflows_since(&mut self, since: DateTime<Utc>) -> Result<i64>;
}

/// Workflow operator repository
#[async_trait]
pub trait WorkflowOperatorRepository: Send {
    /// Operators of a workflow on one node, in insertion order
    async fn list_operators(
        &mut self,
        workflow_id: WorkflowId,
        node: i64,
    ) -> Result<Vec<WorkflowOperator>>;

    /// Insert operator rows, ignoring their `id`
    async fn insert_operators(&mut self, operators: &[WorkflowOperator]) -> Result<()>;

    /// Delete every operator row of a workflow, returning the count removed
    async fn delete_operators(&mut self, workflow_id: WorkflowId) -> Result<u64>;

    /// Mark a user's row on a node as handled, returning the count updated
    async fn mark_handled(
        &mut self,
        workflow_id: WorkflowId,
        node: i64,
        user_id: UserId,
    ) -> Result<u64>;
}

/// User lookup repository
#[async_trait]
pub trait UserRepository: Send {
    /// Get a user by id; `NotFound` if absent
    async fn get_user(&mut self, id: UserId) -> Result<User>;

    /// Active users holding the super admin role, ordered by id
    async fn list_super_admins(&mut self) -> Result<Vec<User>>;

    /// Insert or replace a user
    async fn put_user(&mut self, user: &User) -> Result<()>;
}

/// One unit of work over all repositories
#[async_trait]
pub trait Transaction:
    WorkflowTypeRepository
    + WorkflowNodeRepository
    + WorkflowRepository
    + WorkflowOperatorRepository
    + UserRepository
    + Send
{
    /// Make every write of this transaction visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Storage backend trait
///
/// The trait is object-safe and can be used with `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a new transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
