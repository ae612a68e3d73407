//! Caller supplied form data staged before a transition

use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::HashMap;
use workflow_types::{ExamineAction, FORM_ACTION, FORM_JUMP_NODE, FORM_TITLE};

/// Loosely typed parameters for `initiate` / `examine_approve`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData(HashMap<String, Value>);

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Instance title; blank strings count as absent
    pub fn title(&self) -> Result<Option<String>> {
        match self.get(FORM_TITLE) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(other) => Err(EngineError::InvalidFormData(format!(
                "title must be a string, got {}",
                other
            ))),
        }
    }

    /// Examine action, `next` when absent
    pub fn action(&self) -> Result<ExamineAction> {
        match self.get(FORM_ACTION) {
            None => Ok(ExamineAction::default()),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| EngineError::InvalidExamineAction(s.clone())),
            Some(other) => Err(EngineError::InvalidExamineAction(other.to_string())),
        }
    }

    /// Overrule target sequence; integers and numeric strings are accepted
    pub fn jump_node(&self) -> Result<Option<i64>> {
        match self.get(FORM_JUMP_NODE) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| not_an_integer(n)),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| not_an_integer(format!("'{}'", s))),
            Some(other) => Err(not_an_integer(other)),
        }
    }
}

impl From<HashMap<String, Value>> for FormData {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

fn not_an_integer(found: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidFormData(format!("jump_node must be an integer, got {}", found))
}
