use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "flowcore")]
#[command(version)]
#[command(about = "Run and validate statechart workflows with plugins")]
#[command(long_about = "
flowcore drives workflow definitions (state charts written in JSON or YAML)
through events, running the HTTP, common and dispatch-event plugins declared
alongside them.

Example usage:
  flowcore run flow.json --event next          # Send one event and print the snapshot
  flowcore validate flow.yaml --plugins p.json # Check a definition and its plugins
  flowcore events flow.json --state pending    # List the legal next events
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send events to a fresh runner and print the final snapshot
    #[command(long_about = "
Builds a runner for the definition, sends every --event in order and prints
the resulting state, context and legal next events as JSON. HTTP plugins talk
to the real endpoints; secrets are read from FLOWCORE_SECRET_* variables.

Events are written TYPE or TYPE=JSON, the JSON becoming the event payload.

Exit codes:
  0 - All events were accepted
  1 - An input could not be read or an event was rejected
  2 - The definition or its plugins are invalid

Examples:
  flowcore run flow.json --event next --event next
  flowcore run flow.json --plugins plugins.json --context ctx.json \\
      --event 'decide={\"riskScore\": 90}'
")]
    Run {
        /// Workflow definition (JSON or YAML)
        definition: PathBuf,

        /// Plugin extensions file (JSON or YAML)
        #[arg(long)]
        plugins: Option<PathBuf>,

        /// Initial context (JSON file)
        #[arg(long)]
        context: Option<PathBuf>,

        /// State to resume from, dotted for nested states
        #[arg(long)]
        state: Option<String>,

        /// Event to send, TYPE or TYPE=JSON; repeatable
        #[arg(long = "event", value_name = "TYPE[=JSON]")]
        events: Vec<String>,
    },
    /// Validate a definition and its plugins
    #[command(long_about = "
Checks the state chart structure (initial states, transition targets, guard
kinds) and builds every declared plugin offline to surface schema problems.

Exit codes:
  0 - No issues
  1 - Warnings found
  2 - Errors found

Examples:
  flowcore validate flow.json
  flowcore validate flow.yaml --plugins plugins.yaml --format json
")]
    Validate {
        /// Workflow definition (JSON or YAML)
        definition: PathBuf,

        /// Plugin extensions file (JSON or YAML)
        #[arg(long)]
        plugins: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: ValidateFormat,
    },
    /// List the events accepted in a state
    Events {
        /// Workflow definition (JSON or YAML)
        definition: PathBuf,

        /// State to inspect; the initial state when absent
        #[arg(long)]
        state: Option<String>,
    },
}
