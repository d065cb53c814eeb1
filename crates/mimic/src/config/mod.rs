//! Configuration loading: readers, OpenAPI descriptions and workflow files.

mod openapi;
mod reader;

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::workflow::Workflow;

pub use openapi::{OpenApi, Operation, RequestBody, Response};
pub use reader::{
    file_url, parse_document, ConfigDocument, ConfigInfo, DocumentFormat, FileReader, NoReader,
    ReadError, Reader, StaticReader,
};

/// A file declaring workflows.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkflowFile {
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

impl WorkflowFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("Invalid workflow file {}", path.display()))
    }

    /// Parse YAML (or JSON) text and validate it.
    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let file: WorkflowFile = serde_yaml::from_str(contents)?;
        file.validate()?;
        Ok(file)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let mut names = HashSet::new();
        for workflow in &self.workflows {
            if !names.insert(workflow.name.as_str()) {
                anyhow::bail!("Duplicate workflow name '{}'", workflow.name);
            }
            workflow
                .validate()
                .with_context(|| format!("Invalid workflow '{}'", workflow.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_file_from_yaml() {
        let file = WorkflowFile::from_yaml(
            r#"
workflows:
  - name: greet
    on:
      http:
        - method: GET
          path: /hello
    steps:
      - id: s1
        run: echo hello
"#,
        )
        .unwrap();
        assert_eq!(file.workflows.len(), 1);
        assert_eq!(file.workflows[0].steps[0].id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_duplicate_workflow_names_rejected() {
        let err = WorkflowFile::from_yaml(
            r#"
workflows:
  - name: a
    steps: [{run: "true"}]
  - name: a
    steps: [{run: "true"}]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate workflow name"));
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.yaml");
        std::fs::write(&path, "workflows:\n  - name: a\n    steps:\n      - uses: log\n        run: echo\n").unwrap();
        let err = WorkflowFile::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("wf.yaml"));
    }
}
