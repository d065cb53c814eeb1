//! Scoped evaluation context for a workflow run.
//!
//! Frames form a stack: the root frame holds the host environment, the workflow
//! frame its `env`/`vars`, and each step pushes a frame for its own `env` and
//! `with` inputs. A [`Scope`] guard pops its frame on every exit path.

use crate::expr::{Resolver, Value};
use indexmap::IndexMap;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Default)]
struct Frame {
    env: IndexMap<String, String>,
    vars: IndexMap<String, Value>,
    inputs: IndexMap<String, Value>,
}

#[derive(Debug)]
pub struct Context {
    frames: Vec<Frame>,
    steps: IndexMap<String, Value>,
    event: Value,
    globals: IndexMap<String, Value>,
}

impl Context {
    /// Root context, seeded with the host process environment if `inherit_env`.
    pub fn new(inherit_env: bool) -> Self {
        let mut root = Frame::default();
        if inherit_env {
            root.env.extend(std::env::vars());
        }
        Context {
            frames: vec![root],
            steps: IndexMap::new(),
            event: Value::Null,
            globals: IndexMap::new(),
        }
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = event;
        self
    }

    pub fn with_globals(mut self, globals: IndexMap<String, Value>) -> Self {
        self.globals = globals;
        self
    }

    /// Push a frame; it is popped when the returned guard drops.
    pub fn scope(&mut self) -> Scope<'_> {
        self.frames.push(Frame::default());
        Scope { context: self }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn top(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.top().env.insert(name.into(), value.into());
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.top().vars.insert(name.into(), value);
    }

    pub fn set_input(&mut self, name: impl Into<String>, value: Value) {
        self.top().inputs.insert(name.into(), value);
    }

    /// Environment visible at the current depth; inner frames shadow outer ones.
    pub fn env(&self) -> IndexMap<String, String> {
        let mut merged = IndexMap::new();
        for frame in &self.frames {
            for (k, v) in &frame.env {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    pub fn vars(&self) -> IndexMap<String, Value> {
        let mut merged = IndexMap::new();
        for frame in &self.frames {
            for (k, v) in &frame.vars {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Inputs of the innermost step frame.
    pub fn inputs(&self) -> IndexMap<String, Value> {
        self.frames.last().map(|f| f.inputs.clone()).unwrap_or_default()
    }

    /// Make a finished step visible as `steps.<key>.outputs` and `steps.<key>.status`.
    pub fn record_step(&mut self, key: &str, outputs: IndexMap<String, Value>, status: &str) {
        let mut entry = IndexMap::new();
        entry.insert("outputs".to_string(), Value::Map(outputs));
        entry.insert("status".to_string(), Value::from(status));
        self.steps.insert(key.to_string(), Value::Map(entry));
    }

    pub fn step(&self, key: &str) -> Option<&Value> {
        self.steps.get(key)
    }
}

impl Resolver for Context {
    fn resolve(&self, name: &str) -> Option<Value> {
        match name {
            "env" => Some(Value::Map(
                self.env().into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            )),
            "vars" => Some(Value::Map(self.vars())),
            "steps" => Some(Value::Map(self.steps.clone())),
            "inputs" | "with" => Some(Value::Map(self.inputs())),
            "event" => Some(self.event.clone()),
            _ => self.globals.get(name).cloned(),
        }
    }
}

/// Guard for a pushed frame.
pub struct Scope<'c> {
    context: &'c mut Context,
}

impl Deref for Scope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.context
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.context
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        // The root frame always survives.
        if self.context.frames.len() > 1 {
            self.context.frames.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::evaluate;

    #[test]
    fn test_scope_shadows_and_pops() {
        let mut context = Context::new(false);
        context.set_env("REGION", "eu");
        {
            let mut scope = context.scope();
            scope.set_env("REGION", "us");
            scope.set_input("who", Value::from("world"));
            assert_eq!(scope.env()["REGION"], "us");
            assert_eq!(evaluate("inputs.who", &*scope).unwrap(), Value::from("world"));
            assert_eq!(scope.depth(), 2);
        }
        assert_eq!(context.depth(), 1);
        assert_eq!(context.env()["REGION"], "eu");
        assert_eq!(evaluate("inputs.who", &context).unwrap(), Value::Null);
    }

    #[test]
    fn test_scope_pops_on_early_return() {
        fn failing(context: &mut Context) -> Result<(), ()> {
            let mut scope = context.scope();
            scope.set_var("x", Value::Int(1));
            Err(())
        }
        let mut context = Context::new(false);
        assert!(failing(&mut context).is_err());
        assert_eq!(context.depth(), 1);
        assert!(context.vars().is_empty());
    }

    #[test]
    fn test_host_env_inherited() {
        let context = Context::new(true);
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(context.env().get("PATH"), Some(&path));
        }
        assert!(Context::new(false).env().is_empty());
    }

    #[test]
    fn test_resolves_steps_event_and_globals() {
        let mut globals = IndexMap::new();
        globals.insert("request".to_string(), Value::from(serde_json::json!({"path": "/a"})));
        let mut context = Context::new(false)
            .with_event(Value::from(serde_json::json!({"kind": "manual"})))
            .with_globals(globals);
        let mut outputs = IndexMap::new();
        outputs.insert("greet".to_string(), Value::from("hello"));
        context.record_step("s1", outputs, "success");

        assert_eq!(evaluate("steps.s1.outputs.greet", &context).unwrap(), Value::from("hello"));
        assert_eq!(evaluate("steps.s1.status", &context).unwrap(), Value::from("success"));
        assert_eq!(evaluate("event.kind", &context).unwrap(), Value::from("manual"));
        assert_eq!(evaluate("request.path", &context).unwrap(), Value::from("/a"));
    }
}
