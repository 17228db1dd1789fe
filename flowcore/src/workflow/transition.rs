//! Transition, guard and action declarations of the state chart document

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single candidate transition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Target state reference; `None` makes the transition internal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Guard that must pass for the transition to be taken
    #[serde(default, alias = "guard", skip_serializing_if = "Option::is_none")]
    pub cond: Option<GuardConfig>,
    /// Actions executed while taking the transition
    #[serde(default, deserialize_with = "deserialize_actions", skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRef>,
}

impl TransitionConfig {
    /// Shorthand for an unguarded transition to `target`
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }
}

/// Guard declaration: `{type, options}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Guard kind, `json-logic` or `jmespath`
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind specific options; both kinds read `rule`
    #[serde(default)]
    pub options: Value,
}

/// Reference to a named action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ActionRef {
    /// `"persist"`
    Name(String),
    /// `{"type": "persist", ...}`
    Object {
        /// The action name
        #[serde(rename = "type")]
        name: String,
        /// Extra parameters, kept for the action implementation
        #[serde(flatten)]
        params: Map<String, Value>,
    },
}

impl ActionRef {
    /// The name actions are looked up by
    pub fn name(&self) -> &str {
        match self {
            ActionRef::Name(name) => name,
            ActionRef::Object { name, .. } => name,
        }
    }
}

impl<'de> Deserialize<'de> for ActionRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Object(Map<String, Value>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Name(name) => Ok(ActionRef::Name(name)),
            Raw::Object(mut params) => match params.remove("type") {
                Some(Value::String(name)) => Ok(ActionRef::Object { name, params }),
                _ => Err(serde::de::Error::custom("action object requires a string 'type'")),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// Accept a single action or a list of actions
pub(crate) fn deserialize_actions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ActionRef>, D::Error> {
    Ok(Option::<OneOrMany<ActionRef>>::deserialize(deserializer)?
        .map(Vec::from)
        .unwrap_or_default())
}

/// Accept a single tag or a list of tags
pub(crate) fn deserialize_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<OneOrMany<String>>::deserialize(deserializer)?
        .map(Vec::from)
        .unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTransition {
    Target(String),
    Config(TransitionConfig),
}

impl From<RawTransition> for TransitionConfig {
    fn from(raw: RawTransition) -> Self {
        match raw {
            RawTransition::Target(target) => TransitionConfig::to(target),
            RawTransition::Config(config) => config,
        }
    }
}

/// Accept `"target"`, `{target, cond, actions}` or a list of either
pub(crate) fn deserialize_transitions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<TransitionConfig>, D::Error> {
    let raw: Option<OneOrMany<RawTransition>> = Option::deserialize(deserializer)?;
    Ok(raw
        .map(Vec::from)
        .unwrap_or_default()
        .into_iter()
        .map(TransitionConfig::from)
        .collect())
}

/// Deserialize an `on` map whose values use the transition shorthand forms
pub(crate) fn deserialize_transition_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<std::collections::BTreeMap<String, Vec<TransitionConfig>>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_transitions")] Vec<TransitionConfig>);

    let raw: Option<std::collections::BTreeMap<String, Wrapped>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(event, Wrapped(transitions))| (event, transitions))
        .collect())
}
