//! Synchronous state chart interpreter
//!
//! The interpreter turns `(state, context, event)` into a new state and
//! context plus the ordered list of actions to run. It performs no IO: actions
//! are returned to the runner, which executes them.

use crate::context::merge::{deep_merge_with_options, ArrayMergeOption, MergeError};
use crate::context::transformers::search_truthy;
use crate::context::{is_truthy, shallow_merge};
use crate::workflow::definition::{DefinitionError, StateNode, StateNodeType, WorkflowDefinition};
use crate::workflow::event::{WorkflowEvent, BUILT_IN_DEEP_MERGE_CONTEXT, BUILT_IN_EVENTS, BUILT_IN_UPDATE_CONTEXT};
use crate::workflow::state::{StateError, StateValue};
use crate::workflow::transition::{ActionRef, GuardConfig, TransitionConfig};
use datalogic_rs::DataLogic;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Errors raised while interpreting events
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// The event is not accepted by any active state
    #[error("Event {event} is not allowed in the current state: {state}")]
    IllegalTransition {
        /// Rejected event type
        event: String,
        /// State the workflow is in
        state: String,
    },
    /// The state value does not name a state of the chart
    #[error("State not found: {0}")]
    StateNotFound(String),
    /// The state value is malformed
    #[error(transparent)]
    InvalidState(#[from] StateError),
    /// A guard could not be evaluated
    #[error("Guard evaluation failed in state '{state}': {message}")]
    GuardEvaluation {
        /// State owning the guarded transition
        state: String,
        /// Evaluator message
        message: String,
    },
    /// A built-in event carried an unusable payload
    #[error("Invalid payload for {event}: {message}")]
    InvalidBuiltInPayload {
        /// The built-in event
        event: String,
        /// What is wrong with the payload
        message: String,
    },
    /// Eventless transitions kept firing
    #[error("Eventless transitions from '{state}' exceeded the limit of {limit} steps")]
    EventlessLoop {
        /// State where the loop was detected
        state: String,
        /// The configured limit
        limit: usize,
    },
}

/// Compiled guard
#[derive(Debug, Clone)]
pub enum Guard {
    /// JSON-Logic rule; a falsy result with `assign_on_failure` is reported
    JsonLogic {
        /// The rule tree
        rule: Value,
        /// Report failures as evaluation errors
        assign_on_failure: bool,
        /// Original options, echoed in failure reports
        options: Value,
    },
    /// JMESPath query whose result must be truthy
    Jmespath {
        /// The expression
        rule: String,
    },
}

impl Guard {
    fn compile(config: &GuardConfig, state: &str) -> Result<Self, DefinitionError> {
        let invalid = |message: &str| DefinitionError::InvalidGuard {
            state: state.to_string(),
            message: message.to_string(),
        };
        match config.kind.as_str() {
            "json-logic" => {
                let rule = config
                    .options
                    .get("rule")
                    .cloned()
                    .ok_or_else(|| invalid("json-logic guard requires options.rule"))?;
                let assign_on_failure = config
                    .options
                    .get("assignOnFailure")
                    .map(is_truthy)
                    .unwrap_or(false);
                Ok(Guard::JsonLogic {
                    rule,
                    assign_on_failure,
                    options: config.options.clone(),
                })
            }
            "jmespath" => {
                let rule = config
                    .options
                    .get("rule")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("jmespath guard requires a string options.rule"))?;
                jmespath::compile(rule).map_err(|e| invalid(&e.to_string()))?;
                Ok(Guard::Jmespath {
                    rule: rule.to_string(),
                })
            }
            other => Err(DefinitionError::UnknownGuardKind {
                state: state.to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

/// A JSON-Logic guard rejection that asked to be reported
#[derive(Debug, Clone, PartialEq)]
pub struct GuardFailure {
    /// The guard options, including the rule
    pub options: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Atomic,
    Compound,
    Final,
}

#[derive(Debug, Clone)]
struct CompiledTransition {
    source: usize,
    target: Option<usize>,
    internal: bool,
    guard: Option<Guard>,
    actions: Vec<ActionRef>,
}

#[derive(Debug, Clone)]
struct Node {
    path: Vec<String>,
    id: String,
    parent: Option<usize>,
    children: BTreeMap<String, usize>,
    initial: Option<usize>,
    kind: NodeKind,
    on: BTreeMap<String, Vec<CompiledTransition>>,
    always: Vec<CompiledTransition>,
    entry: Vec<ActionRef>,
    exit: Vec<ActionRef>,
    tags: Vec<String>,
}

const ROOT: usize = 0;

/// Read-only view of a workflow at rest
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Active state
    pub value: StateValue,
    /// Current context
    pub context: Value,
    /// Events accepted in this state, built-ins included
    pub next_events: Vec<String>,
    /// A top-level final state is active
    pub done: bool,
    /// Tags of all active nodes
    pub tags: Vec<String>,
}

impl Snapshot {
    /// Whether the snapshot carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Result of sending one event
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// State after the event
    pub value: StateValue,
    /// Context after the event
    pub context: Value,
    /// Exit, transition and entry actions in execution order
    pub actions: Vec<ActionRef>,
    /// The state value differs from the one before the event
    pub changed: bool,
    /// At least one targeted transition was taken, self-transitions included
    pub reentered: bool,
    /// Reported guard rejections
    pub guard_failures: Vec<GuardFailure>,
    /// A top-level final state is active
    pub done: bool,
    /// Tags of all active nodes
    pub tags: Vec<String>,
}

/// A compiled state chart
#[derive(Debug, Clone)]
pub struct Machine {
    nodes: Vec<Node>,
    max_eventless_steps: usize,
}

impl Machine {
    /// Compile `definition`, rejecting structural errors
    pub fn new(definition: &WorkflowDefinition, max_eventless_steps: usize) -> Result<Self, DefinitionError> {
        if definition.states.is_empty() {
            return Err(DefinitionError::NoStates);
        }

        let mut nodes = vec![Node {
            path: Vec::new(),
            id: "(machine)".to_string(),
            parent: None,
            children: BTreeMap::new(),
            initial: None,
            kind: NodeKind::Compound,
            on: BTreeMap::new(),
            always: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            tags: Vec::new(),
        }];
        let no_eventless: &[TransitionConfig] = &[];
        let mut sources: Vec<(usize, &BTreeMap<String, Vec<TransitionConfig>>, &[TransitionConfig])> =
            vec![(ROOT, &definition.on, no_eventless)];

        for (key, node) in &definition.states {
            add_node(&mut nodes, &mut sources, ROOT, key, node)?;
        }
        nodes[ROOT].initial = resolve_initial(&nodes, ROOT, definition.initial.as_deref())?;

        let mut ids = HashMap::new();
        for (index, node) in nodes.iter().enumerate().skip(1) {
            if ids.insert(node.id.clone(), index).is_some() {
                return Err(DefinitionError::DuplicateStateId(node.id.clone()));
            }
        }

        let mut machine = Self {
            nodes,
            max_eventless_steps,
        };

        for (index, on, always) in sources {
            let mut compiled_on = BTreeMap::new();
            for (event, transitions) in on {
                let compiled = transitions
                    .iter()
                    .map(|t| machine.compile_transition(index, event, t, &ids))
                    .collect::<Result<Vec<_>, _>>()?;
                compiled_on.insert(event.clone(), compiled);
            }
            let compiled_always = always
                .iter()
                .map(|t| machine.compile_transition(index, "always", t, &ids))
                .collect::<Result<Vec<_>, _>>()?;

            let node = &mut machine.nodes[index];
            if node.kind == NodeKind::Final && (!compiled_on.is_empty() || !compiled_always.is_empty()) {
                return Err(DefinitionError::FinalStateTransitions(node.id.clone()));
            }
            node.on = compiled_on;
            node.always = compiled_always;
        }

        Ok(machine)
    }

    fn compile_transition(
        &self,
        source: usize,
        event: &str,
        config: &TransitionConfig,
        ids: &HashMap<String, usize>,
    ) -> Result<CompiledTransition, DefinitionError> {
        let state = self.nodes[source].id.clone();
        let guard = config
            .cond
            .as_ref()
            .map(|cond| Guard::compile(cond, &state))
            .transpose()?;

        let (target, internal) = match config.target.as_deref() {
            None => (None, false),
            Some(reference) => {
                let unknown = || DefinitionError::UnknownTarget {
                    state: state.clone(),
                    event: event.to_string(),
                    target: reference.to_string(),
                };
                let resolved = if let Some(absolute) = reference.strip_prefix('#') {
                    let (id, rest) = match absolute.split_once('.') {
                        Some((id, rest)) => (id, Some(rest)),
                        None => (absolute, None),
                    };
                    ids.get(id)
                        .copied()
                        .and_then(|start| self.descend(start, rest))
                        .map(|t| (t, false))
                } else if let Some(relative) = reference.strip_prefix('.') {
                    self.descend(source, Some(relative)).map(|t| (t, true))
                } else {
                    let parent = self.nodes[source].parent.unwrap_or(ROOT);
                    self.descend(parent, Some(reference)).map(|t| (t, false))
                };
                let (target, internal) = resolved.ok_or_else(unknown)?;
                (Some(target), internal)
            }
        };

        Ok(CompiledTransition {
            source,
            target,
            internal,
            guard,
            actions: config.actions.clone(),
        })
    }

    fn descend(&self, start: usize, path: Option<&str>) -> Option<usize> {
        let Some(path) = path else {
            return Some(start);
        };
        path.split('.')
            .try_fold(start, |current, key| self.nodes[current].children.get(key).copied())
    }

    /// State value of the initial configuration
    pub fn initial_value(&self) -> StateValue {
        self.value_of(self.initial_leaf(ROOT))
    }

    /// Whether `name` designates a state, by dotted path or explicit id
    pub fn has_state(&self, name: &str) -> bool {
        self.nodes
            .iter()
            .skip(1)
            .any(|node| node.path.join(".") == name || node.id == name)
    }

    /// Dotted paths of every state, parents before children
    pub fn state_paths(&self) -> Vec<String> {
        self.nodes.iter().skip(1).map(|node| node.path.join(".")).collect()
    }

    /// States that no transition can ever reach from the initial state
    pub fn unreachable_states(&self) -> Vec<String> {
        let mut reached: HashSet<usize> = HashSet::new();
        let mut pending = vec![self.initial_leaf(ROOT)];
        while let Some(leaf) = pending.pop() {
            for node in self.chain(leaf) {
                if !reached.insert(node) {
                    continue;
                }
                let transitions = self.nodes[node].on.values().flatten().chain(&self.nodes[node].always);
                for transition in transitions {
                    if let Some(target) = transition.target {
                        pending.push(self.initial_leaf(target));
                    }
                }
            }
        }
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(index, _)| !reached.contains(index))
            .map(|(_, node)| node.path.join("."))
            .collect()
    }

    /// Resolve a state value to its active leaf; compound states resolve to
    /// their initial descendant
    fn resolve(&self, value: &StateValue) -> Result<usize, InterpreterError> {
        let path = value.path()?;
        let node = path
            .iter()
            .try_fold(ROOT, |current, key| self.nodes[current].children.get(key).copied())
            .ok_or_else(|| InterpreterError::StateNotFound(value.to_string()))?;
        Ok(self.initial_leaf(node))
    }

    /// Normalise a state value, failing when it names no state
    pub fn validate_state(&self, value: &StateValue) -> Result<StateValue, InterpreterError> {
        self.resolve(value).map(|leaf| self.value_of(leaf))
    }

    fn initial_leaf(&self, mut node: usize) -> usize {
        while let Some(initial) = self.nodes[node].initial {
            node = initial;
        }
        node
    }

    fn value_of(&self, leaf: usize) -> StateValue {
        match StateValue::from_path(&self.nodes[leaf].path) {
            Ok(value) => value,
            Err(_) => StateValue::Atomic(String::new()),
        }
    }

    /// Leaf first, root last
    fn chain(&self, leaf: usize) -> Vec<usize> {
        let mut chain = vec![leaf];
        let mut current = leaf;
        while let Some(parent) = self.nodes[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        let mut current = self.nodes[node].parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes[parent].parent;
        }
        false
    }

    fn next_events_of(&self, leaf: usize) -> Vec<String> {
        let mut events: BTreeSet<String> = BUILT_IN_EVENTS.iter().map(|e| e.to_string()).collect();
        for node in self.chain(leaf) {
            events.extend(self.nodes[node].on.keys().cloned());
        }
        events.into_iter().collect()
    }

    fn tags_of(&self, leaf: usize) -> Vec<String> {
        let tags: BTreeSet<String> = self
            .chain(leaf)
            .into_iter()
            .flat_map(|node| self.nodes[node].tags.iter().cloned())
            .collect();
        tags.into_iter().collect()
    }

    fn is_done(&self, leaf: usize) -> bool {
        self.nodes[leaf].kind == NodeKind::Final && self.nodes[leaf].parent == Some(ROOT)
    }

    /// Events accepted in `value`
    pub fn next_events(&self, value: &StateValue) -> Result<Vec<String>, InterpreterError> {
        self.resolve(value).map(|leaf| self.next_events_of(leaf))
    }

    /// Snapshot of `(value, context)`
    pub fn snapshot(&self, value: &StateValue, context: &Value) -> Result<Snapshot, InterpreterError> {
        let leaf = self.resolve(value)?;
        Ok(Snapshot {
            value: self.value_of(leaf),
            context: context.clone(),
            next_events: self.next_events_of(leaf),
            done: self.is_done(leaf),
            tags: self.tags_of(leaf),
        })
    }

    /// Fail with [`InterpreterError::IllegalTransition`] unless `event` is
    /// accepted in `value`
    pub fn ensure_legal(&self, value: &StateValue, event: &WorkflowEvent) -> Result<(), InterpreterError> {
        let leaf = self.resolve(value)?;
        if event.is_built_in() || self.next_events_of(leaf).contains(&event.event_type) {
            return Ok(());
        }
        Err(InterpreterError::IllegalTransition {
            event: event.event_type.clone(),
            state: serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
        })
    }

    /// Process one event: legality check, built-in context updates, guarded
    /// transition selection, then eventless transitions
    pub fn transition(
        &self,
        value: &StateValue,
        context: &Value,
        event: &WorkflowEvent,
    ) -> Result<TransitionOutcome, InterpreterError> {
        self.ensure_legal(value, event)?;
        let start = self.resolve(value)?;

        let unchanged = |context: Value, guard_failures: Vec<GuardFailure>| TransitionOutcome {
            value: self.value_of(start),
            context,
            actions: Vec::new(),
            changed: false,
            reentered: false,
            guard_failures,
            done: self.is_done(start),
            tags: self.tags_of(start),
        };

        if event.is_built_in() {
            return Ok(unchanged(apply_built_in(context, event)?, Vec::new()));
        }

        let data = shallow_merge(context, event.payload.as_ref());
        let mut guard_failures = Vec::new();
        let Some(selected) = self.select(start, &data, &mut guard_failures, |node| {
            node.on.get(&event.event_type).map(Vec::as_slice)
        })?
        else {
            return Ok(unchanged(context.clone(), guard_failures));
        };

        let mut actions = Vec::new();
        let mut leaf = start;
        let mut reentered = self.microstep(&mut leaf, selected, &mut actions);

        let mut steps = 0;
        while let Some(eventless) = self.select(leaf, &data, &mut guard_failures, |node| {
            (!node.always.is_empty()).then_some(node.always.as_slice())
        })? {
            steps += 1;
            if steps > self.max_eventless_steps {
                return Err(InterpreterError::EventlessLoop {
                    state: self.value_of(leaf).to_string(),
                    limit: self.max_eventless_steps,
                });
            }
            reentered |= self.microstep(&mut leaf, eventless, &mut actions);
        }

        Ok(TransitionOutcome {
            value: self.value_of(leaf),
            context: context.clone(),
            actions,
            changed: leaf != start,
            reentered,
            guard_failures,
            done: self.is_done(leaf),
            tags: self.tags_of(leaf),
        })
    }

    /// First enabled transition, searching from the leaf towards the root
    fn select<'a, F>(
        &'a self,
        leaf: usize,
        data: &Value,
        guard_failures: &mut Vec<GuardFailure>,
        candidates: F,
    ) -> Result<Option<&'a CompiledTransition>, InterpreterError>
    where
        F: Fn(&'a Node) -> Option<&'a [CompiledTransition]>,
    {
        for node in self.chain(leaf) {
            let Some(transitions) = candidates(&self.nodes[node]) else {
                continue;
            };
            for transition in transitions {
                if self.guard_passes(transition, data, guard_failures)? {
                    return Ok(Some(transition));
                }
            }
        }
        Ok(None)
    }

    fn guard_passes(
        &self,
        transition: &CompiledTransition,
        data: &Value,
        guard_failures: &mut Vec<GuardFailure>,
    ) -> Result<bool, InterpreterError> {
        let evaluation_error = |message: String| InterpreterError::GuardEvaluation {
            state: self.nodes[transition.source].id.clone(),
            message,
        };
        match &transition.guard {
            None => Ok(true),
            Some(Guard::JsonLogic {
                rule,
                assign_on_failure,
                options,
            }) => {
                let result = DataLogic::new()
                    .evaluate_json(rule, data, None)
                    .map_err(|e| evaluation_error(e.to_string()))?;
                let passed = is_truthy(&result);
                if !passed && *assign_on_failure {
                    guard_failures.push(GuardFailure {
                        options: options.clone(),
                    });
                }
                Ok(passed)
            }
            Some(Guard::Jmespath { rule }) => {
                search_truthy(rule, data).map_err(|e| evaluation_error(e.to_string()))
            }
        }
    }

    /// Take `transition` from the configuration ending at `leaf`, appending
    /// exit, transition and entry actions. Returns whether it was targeted.
    fn microstep(&self, leaf: &mut usize, transition: &CompiledTransition, actions: &mut Vec<ActionRef>) -> bool {
        let Some(target) = transition.target else {
            actions.extend(transition.actions.iter().cloned());
            return false;
        };

        let domain = if transition.internal {
            transition.source
        } else {
            self.chain(transition.source)
                .into_iter()
                .skip(1)
                .find(|ancestor| self.is_descendant(target, *ancestor))
                .unwrap_or(ROOT)
        };

        for node in self.chain(*leaf).into_iter().take_while(|node| *node != domain) {
            actions.extend(self.nodes[node].exit.iter().cloned());
        }
        actions.extend(transition.actions.iter().cloned());

        let mut entered: Vec<usize> = self
            .chain(target)
            .into_iter()
            .take_while(|node| *node != domain)
            .collect();
        entered.reverse();
        let mut current = target;
        while let Some(initial) = self.nodes[current].initial {
            entered.push(initial);
            current = initial;
        }
        for node in &entered {
            actions.extend(self.nodes[*node].entry.iter().cloned());
        }

        *leaf = current;
        true
    }
}

fn add_node<'d>(
    nodes: &mut Vec<Node>,
    sources: &mut Vec<(usize, &'d BTreeMap<String, Vec<TransitionConfig>>, &'d [TransitionConfig])>,
    parent: usize,
    key: &str,
    definition: &'d StateNode,
) -> Result<usize, DefinitionError> {
    let mut path = nodes[parent].path.clone();
    path.push(key.to_string());
    let dotted = path.join(".");

    if definition.node_type == Some(StateNodeType::Parallel) {
        return Err(DefinitionError::UnsupportedParallelState(dotted));
    }

    let kind = if definition.is_final() {
        NodeKind::Final
    } else if definition.states.is_empty() {
        NodeKind::Atomic
    } else {
        NodeKind::Compound
    };

    let index = nodes.len();
    nodes.push(Node {
        path,
        id: definition.id.clone().unwrap_or_else(|| dotted.clone()),
        parent: Some(parent),
        children: BTreeMap::new(),
        initial: None,
        kind,
        on: BTreeMap::new(),
        always: Vec::new(),
        entry: definition.entry.clone(),
        exit: definition.exit.clone(),
        tags: definition.tags.clone(),
    });
    nodes[parent].children.insert(key.to_string(), index);
    sources.push((index, &definition.on, definition.always.as_slice()));

    for (child_key, child) in &definition.states {
        add_node(nodes, sources, index, child_key, child)?;
    }
    if kind == NodeKind::Compound {
        nodes[index].initial = resolve_initial(nodes, index, definition.initial.as_deref())?;
    }
    Ok(index)
}

fn resolve_initial(nodes: &[Node], index: usize, initial: Option<&str>) -> Result<Option<usize>, DefinitionError> {
    let node = &nodes[index];
    let state = if index == ROOT {
        "(machine)".to_string()
    } else {
        node.path.join(".")
    };
    let initial = initial.ok_or_else(|| DefinitionError::MissingInitial { state: state.clone() })?;
    node.children
        .get(initial)
        .copied()
        .map(Some)
        .ok_or_else(|| DefinitionError::UnknownInitial {
            state,
            initial: initial.to_string(),
        })
}

fn apply_built_in(context: &Value, event: &WorkflowEvent) -> Result<Value, InterpreterError> {
    let invalid = |message: String| InterpreterError::InvalidBuiltInPayload {
        event: event.event_type.clone(),
        message,
    };
    let payload = event.payload.as_ref().ok_or_else(|| invalid("missing payload".to_string()))?;

    match event.event_type.as_str() {
        BUILT_IN_UPDATE_CONTEXT => match payload.get("context") {
            Some(new_context @ Value::Object(_)) => Ok(new_context.clone()),
            _ => Err(invalid("payload.context must be an object".to_string())),
        },
        BUILT_IN_DEEP_MERGE_CONTEXT => {
            let new_context = payload
                .get("newContext")
                .ok_or_else(|| invalid("payload.newContext is required".to_string()))?;
            let option = match payload.get("arrayMergeOption") {
                None | Some(Value::Null) => ArrayMergeOption::default(),
                Some(Value::String(name)) => name.parse().map_err(|e: MergeError| invalid(e.to_string()))?,
                Some(_) => return Err(invalid("payload.arrayMergeOption must be a string".to_string())),
            };
            deep_merge_with_options(context, new_context, option).map_err(|e| invalid(e.to_string()))
        }
        other => Err(invalid(format!("'{other}' is not a built-in event"))),
    }
}
