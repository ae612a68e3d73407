//! Current-user lookup and the shared engine runtime

use super::actions::ActionRegistry;
use crate::config::EngineOptions;
use crate::store::Store;
use std::sync::Arc;
use workflow_types::User;

/// Resolves the authenticated user of the current request
pub trait CurrentUser: Send + Sync {
    fn current_user(&self) -> Option<User>;
}

/// Request context carrying an already authenticated user
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    user: Option<User>,
}

impl RequestContext {
    pub fn authenticated(user: User) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

impl CurrentUser for RequestContext {
    fn current_user(&self) -> Option<User> {
        self.user.clone()
    }
}

/// Everything an engine needs besides the request: storage, node actions and options.
///
/// Cheap to clone; build one at startup and share it.
#[derive(Clone)]
pub struct WorkflowRuntime {
    store: Arc<dyn Store>,
    actions: Arc<ActionRegistry>,
    options: EngineOptions,
}

impl WorkflowRuntime {
    pub fn new(store: Arc<dyn Store>, actions: Arc<ActionRegistry>) -> Self {
        Self {
            store,
            actions,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}
