//! Step actions invoked through `uses`.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action '{0}' not found")]
    NotFound(String),

    #[error("action '{action}' failed: {message}")]
    Failed { action: String, message: String },

    #[error("action cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn failed(action: impl Into<String>, message: impl ToString) -> Self {
        ActionError::Failed {
            action: action.into(),
            message: message.to_string(),
        }
    }
}

/// Everything an action sees of its step.
#[derive(Debug, Clone, Default)]
pub struct ActionInput {
    pub step: String,
    pub inputs: IndexMap<String, serde_json::Value>,
    pub env: IndexMap<String, String>,
    pub working_directory: Option<String>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    pub outputs: IndexMap<String, serde_json::Value>,
    pub log: Vec<String>,
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, input: ActionInput) -> Result<ActionOutput, ActionError>;
}

/// Writes its `message` input to the step log.
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    async fn execute(&self, input: ActionInput) -> Result<ActionOutput, ActionError> {
        let message = match input.inputs.get("message") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(ActionError::failed("log", "missing input 'message'")),
        };
        tracing::info!("[{}] {}", input.step, message);
        Ok(ActionOutput {
            outputs: IndexMap::new(),
            log: vec![message],
        })
    }
}

/// Copies every input to the step outputs.
pub struct SetOutputAction;

#[async_trait]
impl Action for SetOutputAction {
    async fn execute(&self, input: ActionInput) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput {
            outputs: input.inputs,
            log: Vec::new(),
        })
    }
}

/// Named actions available to a runtime.
#[derive(Clone, Default)]
pub struct Actions {
    table: IndexMap<String, Arc<dyn Action>>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut actions = Self::new();
        actions.register("log", LogAction);
        actions.register("set-output", SetOutputAction);
        actions
    }

    pub fn register(&mut self, name: &str, action: impl Action + 'static) {
        self.table.insert(name.to_string(), Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
        self.table
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Actions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.table.keys()).finish()
    }
}
