//! Parsing of the Planning phase's output artifact into a validated task
//! list.
//!
//! The planning agent is prompted to emit either a fenced ```json code
//! block inside its markdown plan, or a bare JSON document. Both are
//! accepted; this resolves the plan-format Open Question left unspecified
//! upstream.

use serde::Deserialize;
use thiserror::Error;

use crate::model::Task;
use crate::queue::{QueueError, TaskQueue};

#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("no JSON plan block found in planning output")]
    NoJsonBlock,

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid task graph: {0}")]
    Invalid(#[from] QueueError),
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    tasks: Vec<Task>,
}

/// Extract the plan's JSON payload from markdown, preferring a fenced
/// ```json block and falling back to the whole trimmed document.
fn extract_json(markdown: &str) -> Option<&str> {
    if let Some(start) = markdown.find("```json") {
        let after_fence = &markdown[start + "```json".len()..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim());
        }
    }
    let trimmed = markdown.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    None
}

/// Parse the planning agent's output into a validated, cycle-checked task
/// queue.
pub fn parse_plan(markdown: &str) -> Result<TaskQueue, PlanParseError> {
    let json = extract_json(markdown).ok_or(PlanParseError::NoJsonBlock)?;
    let doc: PlanDocument = serde_json::from_str(json)?;
    Ok(TaskQueue::new(doc.tasks)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FENCED: &str = r#"
# Implementation Plan

Some prose describing the approach.

```json
{
  "tasks": [
    {
      "id": "t1",
      "name": "Add config field",
      "description": "Add the new field to the config struct",
      "files": ["src/config.rs"],
      "dependencies": [],
      "acceptance_criteria": ["field is serializable"],
      "complexity": "small"
    }
  ]
}
```
"#;

    const BARE: &str = r#"{"tasks":[{"id":"t1","name":"n","description":"d","files":[],"dependencies":[],"acceptance_criteria":[],"complexity":null}]}"#;

    #[test]
    fn parses_fenced_json_block() {
        let queue = parse_plan(FENCED).expect("should parse");
        assert!(queue.task("t1").is_some());
    }

    #[test]
    fn parses_bare_json() {
        let queue = parse_plan(BARE).expect("should parse");
        assert!(queue.task("t1").is_some());
    }

    #[test]
    fn rejects_markdown_with_no_json() {
        let err = parse_plan("# just prose, no plan here").unwrap_err();
        assert!(matches!(err, PlanParseError::NoJsonBlock));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_plan("```json\n{not valid\n```").unwrap_err();
        assert!(matches!(err, PlanParseError::Json(_)));
    }

    #[test]
    fn rejects_cyclic_plan() {
        let markdown = r#"```json
{"tasks":[
  {"id":"a","name":"a","description":"d","files":[],"dependencies":["b"],"acceptance_criteria":[],"complexity":null},
  {"id":"b","name":"b","description":"d","files":[],"dependencies":["a"],"acceptance_criteria":[],"complexity":null}
]}
```"#;
        let err = parse_plan(markdown).unwrap_err();
        assert!(matches!(err, PlanParseError::Invalid(QueueError::Cycle(_))));
    }
}
