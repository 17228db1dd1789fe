//! State chart documents and their structural validation

use crate::validation::{Validatable, ValidationIssue, ValidationLevel};
use crate::workflow::interpreter::Machine;
use crate::workflow::transition::{
    deserialize_actions, deserialize_tags, deserialize_transition_map, deserialize_transitions,
    ActionRef, TransitionConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors in a state chart document
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    /// The document could not be parsed
    #[error("Failed to parse workflow definition: {0}")]
    Parse(String),
    /// The chart declares no states
    #[error("Workflow definition declares no states")]
    NoStates,
    /// A compound node (or the root) has no initial state
    #[error("State '{state}' has child states but no initial state")]
    MissingInitial {
        /// Node lacking the initial state
        state: String,
    },
    /// The initial state is not one of the node's children
    #[error("Initial state '{initial}' of '{state}' is not defined")]
    UnknownInitial {
        /// Node declaring the initial state
        state: String,
        /// The unknown initial state name
        initial: String,
    },
    /// A transition target cannot be resolved
    #[error("Transition '{event}' of state '{state}' targets unknown state '{target}'")]
    UnknownTarget {
        /// Source state of the transition
        state: String,
        /// Event (or `always`) of the transition
        event: String,
        /// The unresolved target reference
        target: String,
    },
    /// A guard kind other than `json-logic` or `jmespath`
    #[error("Guard type '{kind}' used by state '{state}' is not supported")]
    UnknownGuardKind {
        /// Source state of the guarded transition
        state: String,
        /// The unsupported guard kind
        kind: String,
    },
    /// A guard's options are malformed
    #[error("Invalid guard on state '{state}': {message}")]
    InvalidGuard {
        /// Source state of the guarded transition
        state: String,
        /// What is wrong with it
        message: String,
    },
    /// Parallel states are not supported by this engine
    #[error("State '{0}' is a parallel state, which is not supported")]
    UnsupportedParallelState(String),
    /// Final states must not declare outgoing transitions
    #[error("Final state '{0}' declares outgoing transitions")]
    FinalStateTransitions(String),
    /// Two nodes share an explicit id
    #[error("State id '{0}' is used more than once")]
    DuplicateStateId(String),
}

/// Kind of a state node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateNodeType {
    /// A leaf state
    Atomic,
    /// A state with child states
    Compound,
    /// A leaf state that completes its parent
    Final,
    /// Concurrent regions, rejected at load time
    Parallel,
}

/// One node of the state chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateNode {
    /// Explicit node type; inferred from `states` when absent
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<StateNodeType>,
    /// Explicit id usable as `#id` target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Initial child of a compound node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /// Child states
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, StateNode>,
    /// Event transitions
    #[serde(default, deserialize_with = "deserialize_transition_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, Vec<TransitionConfig>>,
    /// Eventless transitions taken as soon as their guard passes
    #[serde(default, deserialize_with = "deserialize_transitions", skip_serializing_if = "Vec::is_empty")]
    pub always: Vec<TransitionConfig>,
    /// Actions run when the state is entered
    #[serde(default, deserialize_with = "deserialize_actions", skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<ActionRef>,
    /// Actions run when the state is exited
    #[serde(default, deserialize_with = "deserialize_actions", skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<ActionRef>,
    /// Tags reported in snapshots, e.g. `failure`
    #[serde(default, deserialize_with = "deserialize_tags", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl StateNode {
    /// Whether the node is declared `type: final`
    pub fn is_final(&self) -> bool {
        self.node_type == Some(StateNodeType::Final)
    }
}

/// A state chart document
///
/// Definitions are data: they are loaded from JSON or YAML and never mutated by
/// a runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Chart id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Top-level initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /// Seed context for new workflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Top-level states
    #[serde(default)]
    pub states: BTreeMap<String, StateNode>,
    /// Root transitions, available from every state
    #[serde(default, deserialize_with = "deserialize_transition_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, Vec<TransitionConfig>>,
}

impl WorkflowDefinition {
    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))
    }

    /// Parse a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self, DefinitionError> {
        serde_yaml::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))
    }

    /// Parse a document from disk, picking the format from the extension
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DefinitionError::Parse(format!("{}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Check initial states, transition targets, guard kinds and final states
    pub fn validate_structure(&self) -> Result<(), DefinitionError> {
        Machine::new(self, 1).map(|_| ())
    }

    /// Display name used in logs and reports
    pub fn name(&self) -> &str {
        self.id.as_deref().unwrap_or("<anonymous>")
    }

    /// Node at a dotted path, e.g. `review.manual`
    pub fn state_mut(&mut self, path: &str) -> Option<&mut StateNode> {
        let mut keys = path.split('.');
        let first = keys.next()?;
        keys.try_fold(self.states.get_mut(first)?, |node, key| node.states.get_mut(key))
    }
}

impl Validatable for WorkflowDefinition {
    fn validate(&self, source_path: Option<&Path>) -> Vec<ValidationIssue> {
        let file_path = source_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Path::new(self.name()).to_path_buf());
        let issue = |level, message: String, suggestion: Option<&str>| ValidationIssue {
            level,
            file_path: file_path.clone(),
            content_title: self.id.clone(),
            line: None,
            column: None,
            message,
            suggestion: suggestion.map(str::to_string),
        };

        let machine = match Machine::new(self, 1) {
            Ok(machine) => machine,
            Err(e) => return vec![issue(ValidationLevel::Error, e.to_string(), None)],
        };

        let mut issues: Vec<ValidationIssue> = machine
            .unreachable_states()
            .into_iter()
            .map(|state| {
                issue(
                    ValidationLevel::Warning,
                    format!("State '{state}' is not reachable from the initial state"),
                    Some("Add a transition targeting it or remove it"),
                )
            })
            .collect();

        if !self.states.values().any(StateNode::is_final) {
            issues.push(issue(
                ValidationLevel::Info,
                "Workflow has no top-level final state".to_string(),
                Some("Mark terminal states with type: final"),
            ));
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_helpers::linear_definition;
    use serde_json::json;

    #[test]
    fn test_parse_json_definition() {
        let definition = linear_definition();
        assert_eq!(definition.initial.as_deref(), Some("open"));
        assert_eq!(definition.states.len(), 3);
        assert!(definition.states["closed"].is_final());
        assert!(definition.validate_structure().is_ok());
    }

    #[test]
    fn test_parse_yaml_definition() {
        let definition = WorkflowDefinition::from_yaml_str(
            r#"
id: kyc
initial: collecting
states:
  collecting:
    on:
      SUBMIT: review
  review:
    tags: [manual]
    on:
      APPROVE: approved
  approved:
    type: final
"#,
        )
        .unwrap();
        assert_eq!(definition.states["review"].tags, vec!["manual"]);
        assert!(definition.validate_structure().is_ok());
    }

    #[test]
    fn test_unknown_target() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "initial": "a",
            "states": {"a": {"on": {"go": "nowhere"}}}
        }))
        .unwrap();
        assert_eq!(
            definition.validate_structure(),
            Err(DefinitionError::UnknownTarget {
                state: "a".into(),
                event: "go".into(),
                target: "nowhere".into()
            })
        );
    }

    #[test]
    fn test_parallel_rejected() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "initial": "p",
            "states": {"p": {"type": "parallel", "states": {"x": {}, "y": {}}}}
        }))
        .unwrap();
        assert_eq!(
            definition.validate_structure(),
            Err(DefinitionError::UnsupportedParallelState("p".into()))
        );
    }

    #[test]
    fn test_final_state_with_transitions_rejected() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "initial": "a",
            "states": {"a": {"type": "final", "on": {"reopen": "a"}}}
        }))
        .unwrap();
        assert_eq!(
            definition.validate_structure(),
            Err(DefinitionError::FinalStateTransitions("a".into()))
        );
    }

    #[test]
    fn test_missing_initial() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "states": {"a": {}}
        }))
        .unwrap();
        assert!(matches!(
            definition.validate_structure(),
            Err(DefinitionError::MissingInitial { .. })
        ));
    }

    #[test]
    fn test_unknown_guard_kind() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "initial": "a",
            "states": {
                "a": {"on": {"go": {"target": "b", "cond": {"type": "cel", "options": {"rule": "true"}}}}},
                "b": {}
            }
        }))
        .unwrap();
        assert!(matches!(
            definition.validate_structure(),
            Err(DefinitionError::UnknownGuardKind { kind, .. }) if kind == "cel"
        ));
    }

    #[test]
    fn test_validatable_reports_unreachable_states() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": "orphans",
            "initial": "a",
            "states": {"a": {"on": {"go": "b"}}, "b": {"type": "final"}, "c": {}}
        }))
        .unwrap();
        let issues = definition.validate(None);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, ValidationLevel::Warning);
        assert!(issues[0].message.contains("'c'"));
    }
}
