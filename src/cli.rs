use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as Json;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::presets::LanguageRegistry;
use crate::config::types::EvaluatorConfig;
use crate::core::orchestrator::Orchestrator;
use crate::core::reentrant::{LoopbackChannel, ReentrantChannel, StaticResolver};
use crate::worker::zscript::ZScriptRuntime;
use crate::worker::ProtocolHandler;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CliMode {
    Evaluator,
    Worker,
}

impl CliMode {
    fn primary_binary(self) -> &'static str {
        match self {
            Self::Evaluator => "evaluator",
            Self::Worker => "zscript-worker",
        }
    }

    fn mode_name(self) -> &'static str {
        match self {
            Self::Evaluator => "evaluator",
            Self::Worker => "worker",
        }
    }

    fn allows(self, command: &Commands) -> bool {
        match self {
            Self::Evaluator => matches!(
                command,
                Commands::Evaluate { .. } | Commands::Languages { .. }
            ),
            Self::Worker => matches!(command, Commands::Serve),
        }
    }

    /// Command to run when none is given on the command line.
    fn default_command(self) -> Option<Commands> {
        match self {
            Self::Evaluator => None,
            Self::Worker => Some(Commands::Serve),
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one function call and print its result envelope
    Evaluate {
        /// File holding the function call as JSON (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Evaluator configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Timeout in milliseconds, overriding config and environment
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Function definitions (JSON object of id -> function) for reentrant calls
        #[arg(long)]
        definitions: Option<PathBuf>,
        /// Treat any reentrant call from the worker as a protocol violation
        #[arg(long)]
        no_reentrancy: bool,
        /// Pretty-print the envelope
        #[arg(long)]
        pretty: bool,
    },
    /// List the languages with a registered executor
    Languages {
        /// Evaluator configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Answer one worker-protocol request on stdin/stdout
    Serve,
}

impl Commands {
    fn command_name(&self) -> &'static str {
        match self {
            Self::Evaluate { .. } => "evaluate",
            Self::Languages { .. } => "languages",
            Self::Serve => "serve",
        }
    }
}

fn validate_command_mode(mode: CliMode, command: &Commands) {
    if mode.allows(command) {
        return;
    }

    eprintln!(
        "Error: command '{}' is not available in '{}' mode",
        command.command_name(),
        mode.mode_name()
    );
    let other = match mode {
        CliMode::Evaluator => CliMode::Worker,
        CliMode::Worker => CliMode::Evaluator,
    };
    eprintln!("Use '{}' for that command.", other.primary_binary());
    std::process::exit(2);
}

fn load_config(path: Option<&PathBuf>) -> Result<EvaluatorConfig> {
    let config = match path {
        Some(path) => EvaluatorConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EvaluatorConfig::default(),
    };
    Ok(config.apply_env()?)
}

fn read_call(input: Option<&PathBuf>) -> Result<Json> {
    let content = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading function call from {}", path.display()))?,
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("reading function call from stdin")?;
            content
        }
    };
    serde_json::from_str(&content).context("function call is not valid JSON")
}

pub fn run(mode: CliMode) -> Result<()> {
    // stderr only: a worker's stdout is its protocol channel
    env_logger::init();

    let cli = Cli::parse();
    let command = cli
        .command
        .or_else(|| mode.default_command())
        .ok_or_else(|| anyhow::anyhow!("missing command"))?;
    validate_command_mode(mode, &command);

    match command {
        Commands::Evaluate {
            input,
            config,
            timeout_ms,
            definitions,
            no_reentrancy,
            pretty,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(timeout_ms) = timeout_ms {
                if timeout_ms == 0 {
                    return Err(anyhow::anyhow!("--timeout-ms must be greater than zero"));
                }
                config.timeout_ms = timeout_ms;
            }
            let call = read_call(input.as_ref())?;

            let orchestrator = Orchestrator::from_config(&config);
            let channel: Option<Box<dyn ReentrantChannel>> = if no_reentrancy {
                None
            } else {
                let resolver = match &definitions {
                    Some(path) => StaticResolver::load_from_file(path)
                        .with_context(|| format!("loading definitions {}", path.display()))?,
                    None => StaticResolver::new(),
                };
                log::debug!("{} function definitions available", resolver.len());
                Some(Box::new(LoopbackChannel::new(
                    orchestrator.clone(),
                    Arc::new(resolver),
                )))
            };

            let envelope = orchestrator.evaluate(&call, channel);
            let rendered = if pretty {
                serde_json::to_string_pretty(&envelope)?
            } else {
                envelope.to_string()
            };
            println!("{}", rendered);
            Ok(())
        }
        Commands::Languages { config } => {
            let config = load_config(config.as_ref())?;
            let registry = LanguageRegistry::from_config(&config);
            for language in registry.languages() {
                if let Some(spec) = registry.lookup(language) {
                    let missing = spec.missing_files();
                    let status = if missing.is_empty() {
                        String::new()
                    } else {
                        format!("  (missing {})", missing.join(", "))
                    };
                    println!(
                        "{:<20} {} {}{}",
                        language,
                        spec.executable,
                        spec.args.join(" "),
                        status
                    );
                }
            }
            Ok(())
        }
        Commands::Serve => {
            let handler = ProtocolHandler::new(ZScriptRuntime);
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            handler.serve(&mut stdin.lock(), &mut stdout.lock(), &mut std::io::stderr())?;
            Ok(())
        }
    }
}
