use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use deskdriver::config::{self, AppConfig};
use deskdriver::errors::DeskDriverResult;
use deskdriver::input::{EnigoDriver, InputDriver, SimulatedInput};
use deskdriver::provider::{CallParams, ModelProvider, OpenAiCompatibleProvider};
use deskdriver::screen::XcapScreen;
use deskdriver::stepper::{create_run_dir, ClickMarker, RunLog, RunOutcome, Stepper};
use deskdriver::verify::VerificationEngine;

#[derive(Debug, Parser)]
#[command(name = "deskdriver", version, about = "Vision-model desktop automation loop")]
struct Cli {
    /// Path to deskdriver.toml (default: next to the executable, then CWD).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one instruction and exit instead of starting the REPL.
    #[arg(long)]
    instruction: Option<String>,

    /// Record actions without touching the real mouse or keyboard.
    #[arg(long)]
    dry_run: bool,

    /// Override the configured per-instruction step bound.
    #[arg(long)]
    max_steps: Option<u32>,

    /// Write a sample deskdriver.toml to PATH and exit.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "deskdriver exiting on error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> DeskDriverResult<()> {
    if let Some(path) = &cli.write_config {
        config::save_config(&AppConfig::sample(), path)?;
        println!("Wrote sample config to {}", path.display());
        return Ok(());
    }

    let mut cfg = config::load_config(cli.config.as_deref())?;
    if cli.dry_run {
        cfg.input.dry_run = true;
    }
    if let Some(max) = cli.max_steps {
        cfg.r#loop.max_steps = max;
    }

    let run_dir = create_run_dir(&runs_base())?;
    let log = RunLog::create(&run_dir)?;
    tracing::info!(
        run_dir = %run_dir.display(),
        log = %log.path().display(),
        "run directory ready"
    );

    let api_key = cfg.provider.resolve_api_key()?;
    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiCompatibleProvider::new(
        cfg.provider.id.clone(),
        cfg.provider.api_base.clone(),
        api_key,
        CallParams {
            model: cfg.provider.model.clone(),
            temperature: cfg.provider.temperature,
            max_output_tokens: cfg.provider.max_output_tokens,
        },
    ));

    let input: Arc<dyn InputDriver> = if cfg.input.dry_run {
        tracing::info!("dry-run mode: input driver is simulated");
        Arc::new(SimulatedInput::new())
    } else {
        Arc::new(EnigoDriver::new()?)
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, stopping at the next step boundary");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut stepper = Stepper::new(
        cfg.stepper_config(),
        provider,
        Arc::new(XcapScreen),
        input,
        Arc::new(log),
        VerificationEngine::new(cfg.verify.clone()),
        run_dir.clone(),
        stop.clone(),
    );
    if cfg.overlay.enabled {
        stepper = stepper.with_marker(ClickMarker::new(cfg.overlay.radius));
    }

    match &cli.instruction {
        Some(instruction) => {
            let outcome = stepper.run_instruction(instruction).await?;
            report(&outcome);
        }
        None => repl(&mut stepper, &stop).await?,
    }
    println!("Logs at {}", run_dir.display());
    Ok(())
}

async fn repl(stepper: &mut Stepper, stop: &Arc<AtomicBool>) -> DeskDriverResult<()> {
    use std::io::Write as _;
    use tokio::io::AsyncBufReadExt;

    println!("deskdriver ready. Type instructions; /stop to end.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/stop" | "/exit" | "/quit") {
            break;
        }

        // A ctrl-c only cancels the run it interrupted.
        stop.store(false, Ordering::SeqCst);
        match stepper.run_instruction(line).await {
            Ok(outcome) => report(&outcome),
            Err(e) => tracing::error!(error = %e, "instruction run failed"),
        }
    }
    Ok(())
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Done => println!("Task complete."),
        RunOutcome::MaxSteps => println!("Stopping (max steps)."),
        RunOutcome::Cancelled => println!("Stopping (user stop)."),
        RunOutcome::DecodeAborted { message } => {
            println!("Stopping: model answers could not be decoded ({message}).");
        }
    }
}

/// Runs live under the platform data dir, falling back to the CWD.
fn runs_base() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("deskdriver"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}
