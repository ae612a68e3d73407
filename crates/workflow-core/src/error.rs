//! Error types for the approval engine

use crate::store::StoreError;
use thiserror::Error;

/// Main error type for all engine operations
///
/// Every variant carries a stable numeric code (see [`EngineError::code`])
/// that callers may expose across a service boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Workflow type does not exist: {0}")]
    WorkflowTypeNotExist(String),

    #[error("Workflow type already exists: {0}")]
    WorkflowTypeDuplicate(String),

    #[error("Workflow does not exist: {0}")]
    WorkflowNotExist(String),

    #[error("Workflow node does not exist: {0}")]
    WorkflowNodeNotExist(String),

    #[error("Workflow node already exists: {0}")]
    WorkflowNodeDuplicate(String),

    #[error("Invalid workflow node: {0}")]
    WorkflowNodeInvalid(String),

    #[error("User does not exist: {0}")]
    UserNotExist(String),

    #[error("Node action not registered: {0}")]
    ActionNotRegistered(String),

    #[error("Invalid node action value: {0}")]
    InvalidActionValue(String),

    #[error("Invalid examine action: {0}")]
    InvalidExamineAction(String),

    #[error("Invalid form data: {0}")]
    InvalidFormData(String),

    #[error("Workflow type has no first node configured")]
    WorkflowEngineNoFirstNodeSet,

    #[error("Workflow has already ended")]
    WorkflowEngineEnded,

    #[error("Workflow has already been started")]
    WorkflowEngineAlreadyStarted,

    #[error("Workflow has not been started")]
    WorkflowEngineNotStarted,

    #[error("Jump target must be before the current node: {0}")]
    WorkflowEngineNodeJumpErr(String),

    #[error("Failed to save workflow: {0}")]
    WorkflowEngineSaveMainDataFail(String),

    #[error("Failed to save workflow operators: {0}")]
    WorkflowEngineSaveOperatorFail(String),

    #[error("Failed to remove workflow operators: {0}")]
    WorkflowEngineRemoveOperatorFail(String),

    #[error("Failed to mark operator as handled: {0}")]
    WorkflowEngineOperatorHandleFail(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("System failure")]
    System,
}

impl EngineError {
    /// Stable error code for the boundary
    pub fn code(&self) -> u32 {
        match self {
            Self::System => 1000,
            Self::Config(_) => 1001,
            Self::NotLoggedIn => 1101,
            Self::UserNotExist(_) => 1102,
            Self::WorkflowTypeNotExist(_) => 3001,
            Self::WorkflowTypeDuplicate(_) => 3002,
            Self::WorkflowNotExist(_) => 3003,
            Self::WorkflowNodeNotExist(_) => 3004,
            Self::WorkflowNodeDuplicate(_) => 3005,
            Self::WorkflowNodeInvalid(_) => 3006,
            Self::ActionNotRegistered(_) => 3101,
            Self::InvalidActionValue(_) => 3102,
            Self::InvalidExamineAction(_) => 3201,
            Self::InvalidFormData(_) => 3202,
            Self::WorkflowEngineNoFirstNodeSet => 3301,
            Self::WorkflowEngineEnded => 3302,
            Self::WorkflowEngineAlreadyStarted => 3303,
            Self::WorkflowEngineNotStarted => 3304,
            Self::WorkflowEngineNodeJumpErr(_) => 3305,
            Self::WorkflowEngineSaveMainDataFail(_) => 3401,
            Self::WorkflowEngineSaveOperatorFail(_) => 3402,
            Self::WorkflowEngineRemoveOperatorFail(_) => 3403,
            Self::WorkflowEngineOperatorHandleFail(_) => 3404,
        }
    }

    /// Translate a store read error. `NotFound` becomes the domain error built by
    /// `not_found`; anything else is logged and reported as `System`.
    pub fn from_lookup<F>(err: StoreError, not_found: F) -> Self
    where
        F: FnOnce(String) -> EngineError,
    {
        match err {
            StoreError::NotFound(what) => not_found(what),
            other => {
                log::error!("Unexpected store error: {}", other);
                Self::System
            }
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        log::error!("Unexpected store error: {}", err);
        Self::System
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_translates_not_found() {
        let err = EngineError::from_lookup(
            StoreError::NotFound("workflow_type 7".to_string()),
            EngineError::WorkflowTypeNotExist,
        );
        assert!(matches!(
            err,
            EngineError::WorkflowTypeNotExist(ref what) if what == "workflow_type 7"
        ));
        assert_eq!(err.code(), 3001);
    }

    #[test]
    fn test_lookup_maps_other_errors_to_system() {
        let err = EngineError::from_lookup(
            StoreError::Database("disk I/O error".to_string()),
            EngineError::WorkflowTypeNotExist,
        );
        assert!(matches!(err, EngineError::System));
        // Internal details never reach the message
        assert_eq!(err.to_string(), "System failure");
    }

    #[test]
    fn test_action_error_codes() {
        let unregistered = EngineError::ActionNotRegistered("finance".to_string());
        assert_eq!(unregistered.code(), 3101);
        assert_eq!(EngineError::InvalidActionValue("[x]".to_string()).code(), 3102);
    }
}
