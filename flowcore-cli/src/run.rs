//! `run` and `events`: drive a definition from the command line

use crate::error::{CliResult, IntoCliResult};
use crate::exit_codes::EXIT_SUCCESS;
use anyhow::{anyhow, Context};
use flowcore::secrets::EnvSecretsManager;
use flowcore::validation::load_extensions;
use flowcore::{
    Config, PluginExtensions, StateValue, WorkflowDefinition, WorkflowEvent,
    WorkflowRunner, WorkflowRunnerBuilder,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Inputs of the `run` command
#[derive(Debug)]
pub struct RunOptions {
    pub definition: PathBuf,
    pub plugins: Option<PathBuf>,
    pub context: Option<PathBuf>,
    pub state: Option<String>,
    pub events: Vec<String>,
}

/// Split `TYPE[=JSON]` into an event
pub fn parse_event(raw: &str) -> anyhow::Result<WorkflowEvent> {
    match raw.split_once('=') {
        Some((event_type, payload)) => {
            let payload: Value = serde_json::from_str(payload)
                .with_context(|| format!("Invalid JSON payload for event '{event_type}'"))?;
            Ok(WorkflowEvent::with_payload(event_type.trim(), payload))
        }
        None if raw.trim().is_empty() => Err(anyhow!("Event type must not be empty")),
        None => Ok(WorkflowEvent::new(raw.trim())),
    }
}

fn load_definition(path: &Path) -> CliResult<WorkflowDefinition> {
    let definition = WorkflowDefinition::from_file(path).cli_validation_error()?;
    definition.validate_structure().cli_validation_error()?;
    Ok(definition)
}

fn parse_state(state: &str) -> CliResult<StateValue> {
    state.parse::<StateValue>().cli_validation_error()
}

fn build_runner(
    definition: WorkflowDefinition,
    extensions: PluginExtensions,
    context: Option<Value>,
    state: Option<StateValue>,
) -> CliResult<WorkflowRunner> {
    let config = Config::global().clone();
    let mut builder = WorkflowRunnerBuilder::new("cli", definition)
        .config(config)
        .extensions(extensions)
        .secrets_manager(Arc::new(EnvSecretsManager::default()));
    if let Some(context) = context {
        builder = builder.machine_context(context);
    }
    if let Some(state) = state {
        builder = builder.state(state);
    }
    builder.build().cli_validation_error()
}

/// Send every event in order and print the final snapshot as JSON
pub async fn run_workflow(options: RunOptions) -> CliResult<i32> {
    let definition = load_definition(&options.definition)?;
    let extensions = match &options.plugins {
        Some(path) => load_extensions(path).cli_validation_error()?,
        None => PluginExtensions::default(),
    };
    let context = match &options.context {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file {}", path.display()))?;
            Some(serde_json::from_str::<Value>(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?)
        }
        None => None,
    };
    let state = options.state.as_deref().map(parse_state).transpose()?;
    let events = options
        .events
        .iter()
        .map(|raw| parse_event(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut runner = build_runner(definition, extensions, context, state)?;
    for event in events {
        tracing::info!(event = %event.event_type, "Sending event");
        let event_type = event.event_type.clone();
        runner
            .send_event(event)
            .await
            .with_context(|| format!("Event '{event_type}' failed"))?;
    }

    let snapshot = runner.get_snapshot().cli_general_error()?;
    let output = serde_json::to_string_pretty(&snapshot).cli_general_error()?;
    println!("{output}");
    Ok(EXIT_SUCCESS)
}

/// Print the events accepted in `state`, one per line
pub fn list_events(definition: &Path, state: Option<&str>) -> CliResult<i32> {
    let definition = load_definition(definition)?;
    let state = state.map(parse_state).transpose()?;
    let runner = build_runner(definition, PluginExtensions::default(), None, state)?;
    let snapshot = runner.get_snapshot().cli_general_error()?;

    for event in &snapshot.next_events {
        println!("{event}");
    }
    Ok(EXIT_SUCCESS)
}
