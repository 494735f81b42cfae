//! Command-line entry point.
//!
//! Runs a single command through the pipeline and prints the result as JSON.
//! Exit status: 0 when the command ran and succeeded, 1 when it was denied
//! or failed, 2 when the pipeline itself could not run it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;

use shellgate::audit::AuditLogger;
use shellgate::config::Settings;
use shellgate::context::GatekeeperContext;
use shellgate::pipeline::ExecutionPipeline;
use shellgate::security::Command;
use shellgate::shell::ShellRunner;
use shellgate::tool;
use shellgate::utils::logger::{init_logging, LogSettings};

/// Gate a shell command behind policy lists, a sandbox and an LLM gatekeeper
#[derive(Parser, Debug)]
#[command(name = "shellgate")]
#[command(override_usage = "shellgate [--config FILE] <REASONING> -- <COMMAND>...")]
struct Args {
    /// YAML settings file
    #[arg(long, short, env = "SHELLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the execute_shell_command tool schema and exit
    #[arg(long)]
    tool_definition: bool,

    /// Why the command should run
    #[arg(required_unless_present = "tool_definition")]
    reasoning: Option<String>,

    /// The command, after `--`
    #[arg(last = true, required_unless_present = "tool_definition")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.tool_definition {
        return match serde_json::to_string_pretty(&tool::tool_definition()) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("shellgate: {}", e);
                ExitCode::from(2)
            }
        };
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("shellgate failed: {:#}", e);
            eprintln!("shellgate: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    let _log_guard = init_logging(&LogSettings::from(&settings));

    let sink = settings.audit_sink().context("failed to open audit log")?;
    tracing::info!("Audit trail at {}", sink.path().display());
    let audit = Arc::new(AuditLogger::start(Box::new(sink), settings.audit_config())?);
    let runner = Arc::new(ShellRunner::new(settings.sandbox.working_root.clone()));

    let pipeline = match ExecutionPipeline::from_settings(&settings, runner, audit.clone()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            audit.shutdown().await?;
            return Err(e).context("invalid pipeline configuration");
        }
    };

    let command = Command::new(args.command.join(" "), args.reasoning.unwrap_or_default());
    let outcome = pipeline.execute(command, GatekeeperContext::new()).await;

    pipeline
        .shutdown(settings.shutdown_grace())
        .await
        .context("failed to close audit log")?;

    let result = outcome.context("command was not processed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}
