//! Approval Workflow Core Library
//!
//! Template-driven approval engine: workflow types with ordered nodes,
//! per-node operator resolution through pluggable actions, and the
//! initiate / next / overrule / cancel transitions over a transactional store.

pub mod config;
pub mod error;
pub mod store;
pub mod workflow;

// Re-export main types for easy access
pub use config::{EngineConfig, EngineOptions};
pub use error::{EngineError, Result};
pub use store::{MemoryStore, SqliteStore, Store, StoreError, Transaction};
pub use workflow::{
    ActionContext, ActionRegistry, CurrentUser, Engine, FormData, NodeAction, RequestContext,
    TemplateAdmin, WorkflowRuntime,
};
pub use workflow_types as types;
