//! histea - client for the remote histogram computation service
//!
//! A CLI tool that submits histogram computations to a remote server,
//! polls the returned tokens until completion and aggregates scale and
//! PDF variations into systematic uncertainty bands.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (connection, config, invalid input, etc.)
//!   2 - The server reported the computation itself as failed

mod analysis;
mod api;
mod cli;
mod config;
mod error;
mod job;
mod models;
mod report;

use anyhow::{Context, Result};
use cli::{Args, Command};
use config::Config;
use error::ClientError;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

use api::Api;
use job::{Job, JobPhase, JobSpec};
use models::Token;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("\nError: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .histea.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(".histea.toml");

    if path.exists() {
        eprintln!(".histea.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .histea.toml")?;

    println!("Created .histea.toml with default settings.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .histea.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e),
    }
}

/// A spinner for long waits, suppressed in quiet mode.
fn make_spinner(quiet: bool, message: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .expect("static template is valid"),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Dispatch the parsed command. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let api = Api::new(&config.api)?;

    match args.command.clone() {
        Command::Processes { detailed } => handle_processes(&api, detailed).await,
        Command::Pdfs => handle_pdfs(&api).await,
        Command::Hist {
            process,
            file,
            save,
            job_file,
            plot,
        } => {
            handle_hist(
                &api,
                &process,
                &file,
                save.as_deref(),
                job_file.as_deref(),
                plot.as_deref(),
                args.quiet,
            )
            .await
        }
        Command::Token {
            token,
            once,
            plot,
            save,
        } => {
            handle_token(
                &api,
                Token::from(token.as_str()),
                once,
                plot.as_deref(),
                save.as_deref(),
                args.quiet,
            )
            .await
        }
    }
}

async fn handle_processes(api: &Api, detailed: Option<String>) -> Result<i32> {
    match detailed {
        Some(process) => {
            let metadata = api.process_metadata(&process).await?;
            print!("{}", report::format_process_metadata(&process, &metadata));
        }
        None => {
            let processes = api.list_processes().await?;
            info!("{} processes available", processes.len());
            for process in processes {
                println!("{}", process);
            }
        }
    }
    Ok(0)
}

async fn handle_pdfs(api: &Api) -> Result<i32> {
    let pdfs = api.list_pdfs().await?;
    info!("{} PDF sets available", pdfs.len());
    for pdf in pdfs {
        println!("{}", pdf);
    }
    Ok(0)
}

async fn handle_hist(
    api: &Api,
    process: &str,
    file: &Path,
    save: Option<&Path>,
    job_file: Option<&Path>,
    plot: Option<&Path>,
    quiet: bool,
) -> Result<i32> {
    // An existing job file takes precedence over the description file, so
    // an interrupted run picks up its already-assigned tokens instead of
    // resubmitting the whole job.
    let mut job = match job_file {
        Some(path) if path.exists() => {
            info!("Resuming job state from {}", path.display());
            Job::load(path)?
        }
        _ => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read job file: {}", file.display()))?;
            let spec: JobSpec = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse job file: {}", file.display()))?;
            let metadata = api.process_metadata(process).await?;
            Job::from_spec(process, &spec, &metadata)?
        }
    };

    if job.phase == JobPhase::Preparation {
        let spinner = make_spinner(quiet, "submitting requests...");
        let submitted = job.submit(api).await;
        spinner.finish_and_clear();

        // Persist the assigned tokens before waiting, and whatever
        // partial state the job reached on failure.
        if let Some(path) = job_file {
            job.store(path)?;
            info!("Job state written to {}", path.display());
        }
        submitted?;
    }

    if job.phase == JobPhase::Submitted {
        let spinner = make_spinner(quiet, "computing histograms...");
        let outcome = job.collect(api).await;
        spinner.finish_and_clear();

        if let Some(path) = job_file {
            job.store(path)?;
        }

        if let Err(e) = outcome {
            if let ClientError::JobErrored(ref detail) = e {
                eprintln!(
                    "\nThe server reported the computation as failed:\n  {}",
                    detail
                );
                return Ok(2);
            }
            return Err(e.into());
        }
    }

    let result = job
        .result
        .as_ref()
        .context("job file is marked finished but carries no result")?;
    emit_result(result, save)?;

    if let Some(path) = plot {
        let central = job
            .sub_requests
            .first()
            .and_then(|sub| sub.token.as_ref())
            .context("job file carries no central token to fetch the plot for")?;
        let bytes = api.get_plot(central).await?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write plot to {}", path.display()))?;
        println!("Plot saved to: {}", path.display());
    }

    Ok(0)
}

async fn handle_token(
    api: &Api,
    token: Token,
    once: bool,
    plot: Option<&Path>,
    save: Option<&Path>,
    quiet: bool,
) -> Result<i32> {
    if once {
        let snapshot = api.poll_once(&token).await?;
        println!("status: {}", snapshot.status);
        if let Some(detail) = snapshot.error_string {
            println!("error: {}", detail);
        }
        if let Some(result) = snapshot.result {
            emit_result(&result, save)?;
        }
        return Ok(0);
    }

    let spinner = make_spinner(quiet, "waiting for token...");
    let outcome = api.wait_for(&token).await;
    spinner.finish_and_clear();

    let result = match outcome {
        Ok(result) => result,
        Err(ClientError::JobErrored(detail)) => {
            eprintln!("\nThe server reported the computation as failed:\n  {}", detail);
            return Ok(2);
        }
        Err(e) => return Err(e.into()),
    };

    emit_result(&result, save)?;

    if let Some(path) = plot {
        let bytes = api.get_plot(&token).await?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write plot to {}", path.display()))?;
        println!("Plot saved to: {}", path.display());
    }

    Ok(0)
}

/// Print the result table, or write the raw result JSON to a file.
fn emit_result(result: &models::HistogramResult, save: Option<&Path>) -> Result<()> {
    match save {
        Some(path) => {
            let json = serde_json::to_string_pretty(result)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write result to {}", path.display()))?;
            println!("Result saved to: {}", path.display());
        }
        None => {
            print!("{}", report::format_result_table(result));
        }
    }
    Ok(())
}
