//! Workflow engine module

pub mod actions;
pub mod context;
pub mod engine;
pub mod form;
pub mod serials;
pub mod template;

pub use actions::{
    ActionContext, ActionRegistry, NodeAction, ACTION_ADMINISTRATORS, ACTION_INITIATOR,
};
pub use context::{CurrentUser, RequestContext, WorkflowRuntime};
pub use engine::Engine;
pub use form::FormData;
pub use template::TemplateAdmin;
