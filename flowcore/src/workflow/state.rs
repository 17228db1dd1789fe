//! State values of a running workflow

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when interpreting state values
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    /// State value cannot be empty or whitespace only
    #[error("State value cannot be empty or whitespace only")]
    EmptyState,
    /// More than one branch is active, which only parallel states produce
    #[error("State value {0} has more than one active branch")]
    MultipleActiveBranches(String),
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// The active configuration of a state chart
///
/// Top-level atomic states are plain strings (`"pending"`). Nested states are
/// objects keyed by the parent (`{"review": "manual"}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// An atomic state name
    Atomic(String),
    /// A compound state and its active child
    Compound(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a state value from the path of node keys, root first
    pub fn from_path<S: AsRef<str>>(path: &[S]) -> StateResult<Self> {
        let Some((leaf, parents)) = path.split_last() else {
            return Err(StateError::EmptyState);
        };
        if leaf.as_ref().trim().is_empty() {
            return Err(StateError::EmptyState);
        }
        let mut value = StateValue::Atomic(leaf.as_ref().to_string());
        for parent in parents.iter().rev() {
            value = StateValue::Compound(BTreeMap::from([(parent.as_ref().to_string(), value)]));
        }
        Ok(value)
    }

    /// Node keys from the root down to the active leaf
    pub fn path(&self) -> StateResult<Vec<String>> {
        let mut path = Vec::new();
        let mut current = self;
        loop {
            match current {
                StateValue::Atomic(name) => {
                    if name.trim().is_empty() {
                        return Err(StateError::EmptyState);
                    }
                    path.push(name.clone());
                    return Ok(path);
                }
                StateValue::Compound(children) => {
                    let mut entries = children.iter();
                    let (Some((key, child)), None) = (entries.next(), entries.next()) else {
                        return Err(if children.is_empty() {
                            StateError::EmptyState
                        } else {
                            StateError::MultipleActiveBranches(self.to_string())
                        });
                    };
                    path.push(key.clone());
                    current = child;
                }
            }
        }
    }

    /// Whether `name` designates this state, either as the dotted path of the
    /// active leaf (`review.manual`) or as a bare atomic name
    pub fn matches(&self, name: &str) -> bool {
        self.path().is_ok_and(|path| path.join(".") == name)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Ok(path) => write!(f, "{}", path.join(".")),
            Err(_) => match serde_json::to_string(self) {
                Ok(json) => write!(f, "{json}"),
                Err(_) => write!(f, "<invalid state>"),
            },
        }
    }
}

impl FromStr for StateValue {
    type Err = StateError;

    /// Parse a dotted path such as `review.manual`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(StateError::EmptyState);
        }
        Self::from_path(&segments)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Atomic(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Atomic(s)
    }
}

impl PartialEq<&str> for StateValue {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, StateValue::Atomic(name) if name == other)
    }
}
