//! Trigger declarations seen by the event matcher, and the events that fire them.

use super::types::{HttpTrigger, ScheduleTrigger, SmtpTrigger, Workflow};
use serde::Serialize;

/// One trigger declaration of a workflow, as passed to the run matcher.
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    Http(&'a HttpTrigger),
    Smtp(&'a SmtpTrigger),
    Schedule(&'a ScheduleTrigger),
    /// Every workflow can be started by name.
    Manual { workflow: &'a str },
}

impl<'a> Trigger<'a> {
    /// All triggers of `workflow`, manual last.
    pub fn all(workflow: &'a Workflow) -> Vec<Trigger<'a>> {
        let on = &workflow.on;
        on.http
            .iter()
            .map(Trigger::Http)
            .chain(on.smtp.iter().map(Trigger::Smtp))
            .chain(on.schedule.iter().map(Trigger::Schedule))
            .chain(std::iter::once(Trigger::Manual {
                workflow: &workflow.name,
            }))
            .collect()
    }
}

/// Something that happened and may start workflows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Http { method: String, path: String },
    Smtp { recipient: String },
    Manual { workflow: String },
}

impl Event {
    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Event::Http {
            method: method.into(),
            path: path.into(),
        }
    }

    pub fn matches(&self, trigger: &Trigger<'_>) -> bool {
        match (self, trigger) {
            (Event::Http { method, path }, Trigger::Http(t)) => {
                t.method
                    .as_deref()
                    .map_or(true, |m| m.eq_ignore_ascii_case(method))
                    && match_path(&t.path, path)
            }
            (Event::Smtp { recipient }, Trigger::Smtp(t)) => match_address(&t.address, recipient),
            (Event::Manual { workflow }, Trigger::Manual { workflow: name }) => workflow == name,
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Match a request path against a pattern: `*` and `{name}` match one segment,
/// `**` any number of segments.
pub fn match_path(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path: Vec<&str> = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match_segments(&pattern, &path)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((head, rest)) => match path.split_first() {
            Some((segment, tail)) => segment_matches(head, segment) && match_segments(rest, tail),
            None => false,
        },
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    pattern == "*" || (pattern.starts_with('{') && pattern.ends_with('}')) || pattern == segment
}

/// Case-insensitive address match where `*` matches any run of characters.
pub fn match_address(pattern: &str, address: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let address: Vec<char> = address.trim().to_lowercase().chars().collect();
    wildcard(&pattern, &address)
}

fn wildcard(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
