//! Runs workflows step by step.

use super::action::{Action, ActionError, ActionInput, ActionOutput, Actions};
use super::context::Context;
use super::shell;
use super::trigger::{Event, Trigger};
use super::types::{Shell, Step, Workflow};
use crate::error::Error;
use crate::expr::{self, Evaluator, ExpressionError, Functions, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Options and summaries
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cancel: CancellationToken,
    /// Whole-run deadline; exceeding it aborts with [`Error::Cancelled`].
    pub deadline: Option<Duration>,
    /// Exposed to expressions as `event`.
    pub event: Option<Event>,
    /// Extra top-level identifiers (e.g. `request`).
    pub globals: IndexMap<String, serde_json::Value>,
    /// Seed the root scope with the host environment.
    pub inherit_env: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            cancel: CancellationToken::new(),
            deadline: None,
            event: None,
            globals: IndexMap::new(),
            inherit_env: true,
        }
    }
}

impl RunOptions {
    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Skip,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub status: Status,
    pub duration_ms: u64,
    pub steps: Vec<StepSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowSummary {
    pub fn step(&self, id: &str) -> Option<&StepSummary> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub workflows: Vec<WorkflowSummary>,
}

impl Summary {
    pub fn workflow(&self, name: &str) -> Option<&WorkflowSummary> {
        self.workflows.iter().find(|w| w.name == name)
    }

    pub fn is_success(&self) -> bool {
        self.workflows.iter().all(|w| w.status != Status::Error)
    }
}

fn millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Runtime
// ============================================================================

/// Action and function registries shared by every run.
#[derive(Debug, Clone)]
pub struct Runtime {
    actions: Actions,
    functions: Functions,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime with the built-in actions and expression functions.
    pub fn new() -> Self {
        Runtime {
            actions: Actions::builtin(),
            functions: Functions::builtin(),
        }
    }

    pub fn register_action(&mut self, name: &str, action: impl Action + 'static) {
        self.actions.register(name, action);
    }

    pub fn functions_mut(&mut self) -> &mut Functions {
        &mut self.functions
    }

    /// Run, in order, every workflow with at least one trigger accepted by
    /// `matcher`. Step failures are reported in the summary; only cancellation
    /// and an exceeded deadline end the run with an error.
    pub async fn run<F>(&self, workflows: &[Workflow], matcher: F, options: RunOptions) -> Result<Summary, Error>
    where
        F: Fn(&Trigger<'_>) -> bool,
    {
        let work = async {
            let mut summary = Summary::default();
            for workflow in workflows {
                if !Trigger::all(workflow).iter().any(|t| matcher(t)) {
                    continue;
                }
                summary.workflows.push(self.run_workflow(workflow, &options).await?);
            }
            Ok::<_, Error>(summary)
        };
        match options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, work).await.map_err(|_| {
                warn!("Workflow run exceeded its deadline of {:?}", deadline);
                Error::Cancelled
            })?,
            None => work.await,
        }
    }

    /// Run workflows matching `event`.
    pub async fn dispatch(&self, workflows: &[Workflow], event: Event, options: RunOptions) -> Result<Summary, Error> {
        let matcher_event = event.clone();
        self.run(workflows, move |t| matcher_event.matches(t), options.with_event(event))
            .await
    }

    async fn run_workflow(&self, workflow: &Workflow, options: &RunOptions) -> Result<WorkflowSummary, Error> {
        let started = Instant::now();
        info!("Workflow '{}' started ({} steps)", workflow.name, workflow.steps.len());

        let globals = options
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect();
        let event = options.event.as_ref().map_or(Value::Null, |e| Value::from(e.to_json()));
        let mut context = Context::new(options.inherit_env)
            .with_event(event)
            .with_globals(globals);
        let mut scope = context.scope();

        let mut summary = WorkflowSummary {
            name: workflow.name.clone(),
            status: Status::Success,
            duration_ms: 0,
            steps: Vec::with_capacity(workflow.steps.len()),
            error: None,
        };
        if let Err(e) = self.install(&mut scope, workflow) {
            warn!("Workflow '{}' failed to initialize: {}", workflow.name, e);
            summary.status = Status::Error;
            summary.error = Some(e.to_string());
        }

        for (index, step) in workflow.steps.iter().enumerate() {
            if options.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let key = step.key(index);
            let mut step_summary = StepSummary {
                id: key.clone(),
                name: step.label(index),
                status: Status::Skip,
                duration_ms: 0,
                log: Vec::new(),
                outputs: IndexMap::new(),
                error: None,
            };
            if summary.status == Status::Error {
                summary.steps.push(step_summary);
                continue;
            }

            let step_started = Instant::now();
            match self.run_step(&mut scope, step, &key, &options.cancel).await {
                Ok(Some(output)) => {
                    step_summary.status = Status::Success;
                    step_summary.log = output.log;
                    step_summary.outputs = output.outputs;
                }
                Ok(None) => debug!("Step '{}' skipped", key),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Step '{}' of workflow '{}' failed: {}", key, workflow.name, e);
                    step_summary.status = Status::Error;
                    step_summary.error = Some(e.to_string());
                    summary.status = Status::Error;
                    summary.error = Some(format!("step '{}' failed: {}", key, e));
                }
            }
            step_summary.duration_ms = millis(step_started);

            let outputs = step_summary
                .outputs
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v)))
                .collect();
            scope.record_step(&key, outputs, step_summary.status.as_str());
            summary.steps.push(step_summary);
        }

        summary.duration_ms = millis(started);
        info!(
            "Workflow '{}' finished with status {} in {}ms",
            workflow.name,
            summary.status.as_str(),
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Install workflow-level `env` then `vars`, each rendered in order.
    fn install(&self, context: &mut Context, workflow: &Workflow) -> Result<(), ExpressionError> {
        for (name, template) in &workflow.env {
            let value = self.render(context, template)?;
            context.set_env(name.clone(), value.to_string());
        }
        for (name, value) in &workflow.vars {
            let value = self.render_json(context, value)?;
            context.set_var(name.clone(), value);
        }
        Ok(())
    }

    /// Run one step in its own scope; `None` when its condition is false.
    async fn run_step(
        &self,
        context: &mut Context,
        step: &Step,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ActionOutput>, Error> {
        let mut scope = context.scope();

        if let Some(condition) = &step.condition {
            if !self.condition(&scope, condition)? {
                return Ok(None);
            }
        }
        for (name, template) in &step.env {
            let value = self.render(&scope, template)?;
            scope.set_env(name.clone(), value.to_string());
        }
        let mut inputs = IndexMap::new();
        for (name, value) in &step.with {
            let value = self.render_json(&scope, value)?;
            inputs.insert(name.clone(), value.to_json());
            scope.set_input(name.clone(), value);
        }

        let input = ActionInput {
            step: key.to_string(),
            inputs,
            env: scope.env(),
            working_directory: step.working_directory.clone(),
            cancel: cancel.clone(),
        };
        info!("Step '{}' started", key);
        let output = match (&step.uses, &step.run) {
            (Some(uses), None) => self.actions.get(uses)?.execute(input).await?,
            (None, Some(run)) => {
                let script = self.render(&scope, run)?.to_string();
                let shell = step.shell.unwrap_or_else(Shell::platform_default);
                shell::run(shell, &script, &input.env, input.working_directory.as_deref(), cancel).await?
            }
            _ => {
                return Err(ActionError::failed(
                    key,
                    "step must declare exactly one of 'uses' or 'run'",
                )
                .into())
            }
        };
        Ok(Some(output))
    }

    fn evaluator<'e>(&'e self, context: &'e Context) -> Evaluator<'e> {
        Evaluator::new(&self.functions, context)
    }

    fn condition(&self, context: &Context, condition: &str) -> Result<bool, ExpressionError> {
        let mut evaluator = self.evaluator(context);
        let value = if expr::has_placeholder(condition) {
            expr::interpolate(condition, &mut evaluator)?
        } else {
            evaluator.eval(&expr::parse(condition)?)?
        };
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::NotBoolean(other.kind().to_string())),
        }
    }

    fn render(&self, context: &Context, template: &str) -> Result<Value, ExpressionError> {
        expr::interpolate(template, &mut self.evaluator(context))
    }

    /// Render every string inside a JSON value.
    fn render_json(&self, context: &Context, value: &serde_json::Value) -> Result<Value, ExpressionError> {
        Ok(match value {
            serde_json::Value::String(s) => self.render(context, s)?,
            serde_json::Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_json(context, item))
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.render_json(context, v)?)))
                    .collect::<Result<_, ExpressionError>>()?,
            ),
            other => Value::from(other),
        })
    }
}
