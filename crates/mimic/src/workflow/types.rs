//! Workflow declarations as read from configuration.

use crate::expr;
use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// ============================================================================
// Triggers
// ============================================================================

/// Events that start a workflow.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Triggers {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smtp: Vec<SmtpTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<ScheduleTrigger>,
}

/// Matches a request by method and path pattern (`*` one segment, `**` any depth).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HttpTrigger {
    /// Any method when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub path: String,
}

/// Matches an incoming mail by recipient; `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SmtpTrigger {
    #[serde(alias = "to")]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTrigger {
    /// Fixed interval such as `30s`, `5m` or `1h30m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<String>,
    /// Cron expression with five or six fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Number of runs; 0 means unlimited.
    #[serde(default)]
    pub iterations: u64,
    #[serde(default)]
    pub run_first_time_immediately: bool,
}

impl ScheduleTrigger {
    pub fn interval(&self) -> anyhow::Result<Option<Duration>> {
        self.every.as_deref().map(parse_every).transpose()
    }

    pub fn cron(&self) -> anyhow::Result<Option<croner::Cron>> {
        self.cron
            .as_deref()
            .map(|pattern| {
                croner::Cron::new(pattern)
                    .with_seconds_optional()
                    .parse()
                    .with_context(|| format!("Invalid cron expression '{}'", pattern))
            })
            .transpose()
    }
}

/// Parse an interval such as `500ms`, `30s`, `1h30m` or `2d`.
pub fn parse_every(text: &str) -> anyhow::Result<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = text.trim();
    if rest.is_empty() {
        bail!("Empty interval");
    }
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            bail!("Invalid interval '{}': expected a number", text);
        }
        let amount: u64 = rest[..digits]
            .parse()
            .with_context(|| format!("Invalid interval '{}'", text))?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount * 60),
            "h" => Duration::from_secs(amount * 3600),
            "d" => Duration::from_secs(amount * 86_400),
            "" => bail!("Invalid interval '{}': missing unit", text),
            other => bail!("Invalid interval '{}': unknown unit '{}'", text, other),
        };
        total += part;
    }
    if total.is_zero() {
        bail!("Interval '{}' must be greater than zero", text);
    }
    Ok(total)
}

// ============================================================================
// Steps
// ============================================================================

/// Program used for `run` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Bash,
    Sh,
    Cmd,
    Powershell,
    Pwsh,
}

impl Shell {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Shell::Cmd
        } else {
            Shell::Sh
        }
    }

    /// Program and arguments that run `script`.
    pub fn command(self, script: &str) -> (&'static str, Vec<String>) {
        let script = script.to_string();
        match self {
            Shell::Bash => ("bash", vec!["--noprofile".into(), "--norc".into(), "-eo".into(), "pipefail".into(), "-c".into(), script]),
            Shell::Sh => ("sh", vec!["-e".into(), "-c".into(), script]),
            Shell::Cmd => ("cmd", vec!["/D".into(), "/C".into(), script]),
            Shell::Powershell => ("powershell", vec!["-NoProfile".into(), "-NonInteractive".into(), "-Command".into(), script]),
            Shell::Pwsh => ("pwsh", vec!["-NoProfile".into(), "-NonInteractive".into(), "-Command".into(), script]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Condition; `${{ }}` placeholders or a bare expression.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Shell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub with: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

impl Step {
    /// Identifier under `steps`: the declared id or `step<N>` (1-based).
    pub fn key(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("step{}", index + 1))
    }

    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| self.key(index))
    }
}

// ============================================================================
// Workflow
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub on: Triggers,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Check a condition: either a template or a bare expression.
pub(crate) fn check_condition(condition: &str) -> Result<(), expr::ExpressionError> {
    if expr::has_placeholder(condition) {
        expr::check(condition)
    } else {
        expr::parse(condition).map(|_| ())
    }
}

fn check_templates(value: &serde_json::Value) -> Result<(), expr::ExpressionError> {
    match value {
        serde_json::Value::String(s) => expr::check(s),
        serde_json::Value::Array(items) => items.iter().try_for_each(check_templates),
        serde_json::Value::Object(map) => map.values().try_for_each(check_templates),
        _ => Ok(()),
    }
}

impl Workflow {
    /// Validate the declaration: unique step ids, exactly one of `uses`/`run` per
    /// step, parseable expressions and well-formed schedule triggers.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            bail!("Workflow name must not be empty");
        }
        for (key, value) in &self.env {
            expr::check(value).with_context(|| format!("Invalid expression in env '{}'", key))?;
        }
        for (key, value) in &self.vars {
            check_templates(value).with_context(|| format!("Invalid expression in vars '{}'", key))?;
        }

        let mut ids = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            let key = step.key(index);
            if !ids.insert(key.clone()) {
                bail!("Duplicate step id '{}'", key);
            }
            match (&step.uses, &step.run) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => bail!("Step '{}' must declare exactly one of 'uses' or 'run'", key),
            }
            if let Some(condition) = &step.condition {
                check_condition(condition).with_context(|| format!("Invalid 'if' in step '{}'", key))?;
            }
            if let Some(run) = &step.run {
                expr::check(run).with_context(|| format!("Invalid expression in 'run' of step '{}'", key))?;
            }
            for (name, value) in &step.with {
                check_templates(value)
                    .with_context(|| format!("Invalid expression in input '{}' of step '{}'", name, key))?;
            }
            for (name, value) in &step.env {
                expr::check(value).with_context(|| format!("Invalid expression in env '{}' of step '{}'", name, key))?;
            }
        }

        for trigger in &self.on.http {
            if !trigger.path.starts_with('/') {
                bail!("HTTP trigger path '{}' must start with '/'", trigger.path);
            }
        }
        for trigger in &self.on.schedule {
            match (trigger.interval()?, trigger.cron()?) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => bail!("Schedule trigger must declare exactly one of 'every' or 'cron'"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(yaml: &str) -> Workflow {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_deserialize_full_workflow() {
        let wf = workflow(
            r#"
name: orders
on:
  http:
    - method: POST
      path: /orders/*
  smtp:
    - to: "*@example.com"
  schedule:
    - every: 1m
      iterations: 3
      runFirstTimeImmediately: true
env:
  REGION: eu
vars:
  limit: 10
steps:
  - id: check
    if: ${{ vars.limit > 5 }}
    uses: set-output
    with:
      status: ok
  - run: echo "::set-output name=greet::hello"
    shell: bash
    working-directory: /tmp
"#,
        );
        assert_eq!(wf.on.http[0].method.as_deref(), Some("POST"));
        assert_eq!(wf.on.smtp[0].address, "*@example.com");
        assert!(wf.on.schedule[0].run_first_time_immediately);
        assert_eq!(wf.steps[1].shell, Some(Shell::Bash));
        assert_eq!(wf.steps[1].working_directory.as_deref(), Some("/tmp"));
        assert_eq!(wf.steps[1].key(1), "step2");
        wf.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_steps() {
        let both = workflow("name: a\nsteps:\n  - uses: log\n    run: echo\n");
        assert!(both.validate().unwrap_err().to_string().contains("exactly one of"));

        let neither = workflow("name: a\nsteps:\n  - id: x\n");
        assert!(neither.validate().is_err());

        let duplicate = workflow("name: a\nsteps:\n  - id: x\n    run: 'true'\n  - id: x\n    run: 'true'\n");
        assert!(duplicate.validate().unwrap_err().to_string().contains("Duplicate step id 'x'"));

        let bad_if = workflow("name: a\nsteps:\n  - run: 'true'\n    if: 1 +\n");
        let err = bad_if.validate().unwrap_err();
        assert!(format!("{err:#}").contains("syntax error"), "{err:#}");
    }

    #[test]
    fn test_validate_schedule_triggers() {
        let both = workflow("name: a\non:\n  schedule:\n    - every: 1s\n      cron: '* * * * *'\n");
        assert!(both.validate().is_err());
        let bad_cron = workflow("name: a\non:\n  schedule:\n    - cron: 'not a cron'\n");
        assert!(bad_cron.validate().is_err());
        let ok = workflow("name: a\non:\n  schedule:\n    - cron: '*/5 * * * *'\n");
        ok.validate().unwrap();
    }

    #[test]
    fn test_parse_every() {
        assert_eq!(parse_every("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_every("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_every("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_every("10").is_err());
        assert!(parse_every("5w").is_err());
        assert!(parse_every("0s").is_err());
    }
}
