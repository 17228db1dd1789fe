use std::process;

use clap::CommandFactory;
use colored::control;
use flowcore_cli::cli::{Cli, Commands};
use flowcore_cli::error::{handle_cli_result, CliError};
use flowcore_cli::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use flowcore_cli::run::{list_events, run_workflow, RunOptions};
use flowcore_cli::{logging, validate};
use is_terminal::IsTerminal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let Some(command) = cli.command else {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("Failed to print help: {e}");
        }
        process::exit(EXIT_SUCCESS);
    };

    if !std::io::stdout().is_terminal() {
        control::set_override(false);
    }
    logging::init(logging::log_level(cli.quiet, cli.debug, cli.verbose));

    let exit_code = match command {
        Commands::Run {
            definition,
            plugins,
            context,
            state,
            events,
        } => {
            tracing::info!(definition = %definition.display(), "Running workflow");
            handle_cli_result(
                run_workflow(RunOptions {
                    definition,
                    plugins,
                    context,
                    state,
                    events,
                })
                .await,
            )
        }
        Commands::Validate {
            definition,
            plugins,
            format,
        } => {
            tracing::info!(definition = %definition.display(), "Validating workflow");
            handle_cli_result(
                validate::run_validate_command(&definition, plugins.as_deref(), cli.quiet, format)
                    .map_err(|e| CliError::new(format!("{e:#}"), EXIT_ERROR)),
            )
        }
        Commands::Events { definition, state } => handle_cli_result(list_events(&definition, state.as_deref())),
    };

    process::exit(exit_code);
}
