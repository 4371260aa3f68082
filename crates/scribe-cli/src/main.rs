//! Scribe CLI - answer requests by generating, reviewing and running code
//!
//! Usage:
//!   scribe init                  Write a default .scribe/config.toml
//!   scribe config                Print the effective configuration
//!   scribe run <request>         Answer a request through the full pipeline
//!   scribe validate <code>       Compile-check a snippet without running it
//!   scribe exec <code>           Run a snippet in the sandbox

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scribe_agent::{ChatClient, CompletionService};
use scribe_core::fail_open::fail_open;
use scribe_core::ScribeConfig;
use scribe_orchestrator::{Pipeline, StageEvent};
use scribe_sandbox::{Diagnostic, SandboxError, ScriptSandbox};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(author, version, about = "Answer requests by generating, reviewing and running code")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding .scribe/config.toml
    #[arg(short = 'C', long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Answer a request through the full pipeline
    Run {
        /// The natural-language request
        request: String,

        /// Write every stage event to this JSON file
        #[arg(long)]
        transcript: Option<PathBuf>,

        /// Print the presentation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile-check a snippet without running it
    Validate {
        #[command(flatten)]
        source: CodeSource,
    },

    /// Run a snippet in the sandbox and print its value
    Exec {
        #[command(flatten)]
        source: CodeSource,

        /// Deadline for this run, capped by the configured maximum
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// Where snippet code comes from: inline, a file, or stdin
#[derive(Args)]
struct CodeSource {
    /// Inline code
    #[arg(conflicts_with = "file")]
    code: Option<String>,

    /// Read code from a file
    #[arg(short, long)]
    file: Option<PathBuf>,
}

impl CodeSource {
    async fn read(&self) -> Result<String> {
        if let Some(path) = &self.file {
            return tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {:?}", path));
        }
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
            .await?
            .context("Failed to read code from stdin")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.root, force),
        Commands::Config => cmd_config(&cli.root),
        Commands::Run {
            request,
            transcript,
            json,
        } => cmd_run(&cli.root, &request, transcript, json).await,
        Commands::Validate { source } => cmd_validate(&cli.root, &source).await,
        Commands::Exec { source, timeout_ms } => cmd_exec(&cli.root, &source, timeout_ms).await,
    }
}

fn load_config(root: &Path) -> Result<ScribeConfig> {
    ScribeConfig::load_or_default(root)
        .with_context(|| format!("Failed to load config from {:?}", ScribeConfig::path_in(root)))
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let path = ScribeConfig::path_in(root);
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }

    let written = ScribeConfig::write_default(root).context("Failed to write config")?;
    println!("Initialized Scribe in {:?}", root);
    println!("Created:");
    println!("  {}", written.display());
    Ok(())
}

fn cmd_config(root: &Path) -> Result<()> {
    let config = load_config(root)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn cmd_run(
    root: &Path,
    request: &str,
    transcript: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = load_config(root)?;

    let completion: Arc<dyn CompletionService> = Arc::new(
        ChatClient::new(&config.completion).context("Failed to create completion client")?,
    );
    let sandbox =
        Arc::new(ScriptSandbox::new(config.sandbox.clone()).context("Failed to create sandbox")?);

    let (tx, mut rx) = mpsc::unbounded_channel::<StageEvent>();
    let pipeline = Pipeline::new(completion, sandbox, &config.prompts, &config.pipeline)
        .context("Failed to build pipeline")?
        .with_observer(tx);

    let progress = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            eprintln!(
                "  [{}] {} -> {} ({} ms)",
                event.step,
                event.stage,
                event.output.kind(),
                event.duration.as_millis()
            );
            events.push(event);
        }
        events
    });

    let cancel = cancel_on_ctrl_c();
    let result = pipeline.run(request, &cancel).await;

    // Closing the observer channel lets the progress task finish
    drop(pipeline);
    let events = progress.await.unwrap_or_default();

    if let Some(path) = transcript {
        if fail_open("transcript", || write_transcript(&path, &events))
            .await
            .is_some()
        {
            info!("Wrote {} events to {:?}", events.len(), path);
        }
    }

    let outcome = result.context("Pipeline run failed")?;
    let kind = outcome.output.kind();
    let Some(presentation) = outcome.output.into_presentation() else {
        bail!("Run ended with {} instead of a presentation", kind);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&presentation)?);
    } else {
        if !presentation.summary.is_empty() {
            println!("{}\n", presentation.summary);
        }
        println!("{}", presentation.formatted_result);
    }
    Ok(())
}

async fn write_transcript(path: &Path, events: &[StageEvent]) -> scribe_core::Result<()> {
    let content = serde_json::to_string_pretty(events)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

async fn cmd_validate(root: &Path, source: &CodeSource) -> Result<()> {
    let config = load_config(root)?;
    let code = source.read().await?;
    let sandbox = ScriptSandbox::new(config.sandbox).context("Failed to create sandbox")?;

    match sandbox.validate(&code).await {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(SandboxError::Compilation { diagnostics }) => {
            print_diagnostics(&diagnostics);
            bail!("Compilation failed with {} error(s)", diagnostics.len());
        }
        Err(e) => Err(e).context("Validation failed"),
    }
}

async fn cmd_exec(root: &Path, source: &CodeSource, timeout_ms: Option<u64>) -> Result<()> {
    let config = load_config(root)?;
    let code = source.read().await?;
    let sandbox = ScriptSandbox::new(config.sandbox).context("Failed to create sandbox")?;
    let cancel = cancel_on_ctrl_c();

    match sandbox
        .execute_with_deadline(&code, timeout_ms.map(Duration::from_millis), &cancel)
        .await
    {
        Ok(success) => {
            debug!("Finished in {:?}", success.elapsed);
            println!("{}", success.value);
            Ok(())
        }
        Err(SandboxError::Compilation { diagnostics }) => {
            print_diagnostics(&diagnostics);
            bail!("Compilation failed with {} error(s)", diagnostics.len());
        }
        Err(e) => Err(e).context("Execution failed"),
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("  {}", diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "scribe",
            "-v",
            "run",
            "What is 2+2?",
            "--transcript",
            "out.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                request,
                transcript,
                json,
            } => {
                assert_eq!(request, "What is 2+2?");
                assert_eq!(transcript, Some(PathBuf::from("out.json")));
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_code_and_file_conflict() {
        let result = Cli::try_parse_from(["scribe", "exec", "1 + 1", "--file", "a.js"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_exec_timeout_flag() {
        let cli = Cli::try_parse_from(["scribe", "exec", "1 + 1", "--timeout-ms", "250"]).unwrap();
        match cli.command {
            Commands::Exec { source, timeout_ms } => {
                assert_eq!(source.code.as_deref(), Some("1 + 1"));
                assert_eq!(timeout_ms, Some(250));
            }
            _ => panic!("expected exec"),
        }
    }

    #[tokio::test]
    async fn test_code_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snippet.js");
        std::fs::write(&path, "2 + 2").unwrap();

        let source = CodeSource {
            code: None,
            file: Some(path),
        };
        assert_eq!(source.read().await.unwrap(), "2 + 2");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path(), false).unwrap();
        assert!(cmd_init(dir.path(), false).is_err());
        cmd_init(dir.path(), true).unwrap();
        assert!(load_config(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn test_transcript_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        write_transcript(&path, &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
