use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use tabula_core::{
    CodeExecutor, ConfigLoader, ExecutionRequest, SandboxConfig, SandboxedCodeExecutor,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(name = "Tabula", author, version = "0.1.0", about = "Run analysis code in a disposable Docker sandbox")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        short,
        global = true,
        help = "YAML configuration file (defaults plus TABULA_* environment overrides when omitted)"
    )]
    config: Option<PathBuf>,

    #[clap(long, short, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a script in a fresh sandbox and print the result as JSON
    Run {
        /// Script to execute; the configured preamble is prepended
        script: PathBuf,

        #[clap(long = "input", short, help = "Input file name under the input directory (repeatable)")]
        inputs: Vec<String>,

        #[clap(long = "output", short, help = "Output file name to retrieve from the workspace (repeatable)")]
        outputs: Vec<String>,

        #[clap(long, help = "Override the wall-clock limit in seconds")]
        timeout: Option<u64>,
    },
    /// Check that the Docker daemon is reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the JSON result
    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .target(env_logger::Target::Stderr)
        .init();

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run {
            script,
            inputs,
            outputs,
            timeout,
        } => run_script(config, script, inputs, outputs, timeout).await,
        Commands::Ping => ping(config).await,
    }
}

async fn load_config(path: Option<&std::path::Path>) -> Result<SandboxConfig> {
    let config = match path {
        Some(path) => ConfigLoader::from_file(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigLoader::from_env().context("Failed to build configuration")?,
    };
    log::debug!("Loaded configuration: {:?}", config);
    Ok(config)
}

async fn run_script(
    mut config: SandboxConfig,
    script: PathBuf,
    inputs: Vec<String>,
    outputs: Vec<String>,
    timeout: Option<u64>,
) -> Result<()> {
    if let Some(seconds) = timeout {
        config.timeout_seconds = seconds;
    }

    let code = tokio::fs::read_to_string(&script)
        .await
        .with_context(|| format!("Failed to read script {}", script.display()))?;

    let executor = SandboxedCodeExecutor::connect(config)
        .await
        .context("Failed to set up the sandbox executor")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling execution");
            on_interrupt.cancel();
        }
    });

    let request = ExecutionRequest::new(code)
        .with_input_files(inputs)
        .with_output_files(outputs);
    let outcome = executor.execute_with_cancel(request, cancel).await;
    executor.close().await;

    let result = outcome.context("Sandbox execution failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        let code = i32::try_from(result.status_code)
            .ok()
            .filter(|code| (1..=255).contains(code))
            .unwrap_or(1);
        std::process::exit(code);
    }
    Ok(())
}

async fn ping(config: SandboxConfig) -> Result<()> {
    let executor = SandboxedCodeExecutor::connect(config)
        .await
        .context("Docker daemon is not reachable")?;
    executor.ping().await.context("Docker ping failed")?;
    println!("Docker daemon reachable, sandbox image {}", executor.config().image);
    executor.close().await;
    Ok(())
}
