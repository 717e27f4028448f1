use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use lead_console::{
    validate, write_exports, AppConfig, AppError, AppState, BatchDraft, ExportFormat,
    PhaseObserver, RunOptions, SubmissionPhase,
};

#[derive(Parser, Debug)]
#[command(name = "lead-console", version, about = "Batch lead generation console")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check which input lines would be submitted
    Validate(InputArgs),
    /// Show configuration and probe the automation endpoint
    Health,
    /// Submit a batch and export the returned leads
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// File with one profile URL per line (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Use the built-in example input
    #[arg(long, conflicts_with = "input")]
    example: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Automation endpoint URL
    #[arg(long, env = "WORKFLOW_ENDPOINT_URL")]
    endpoint: Option<String>,
    /// Client-side deadline for the workflow call
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Directory for the exported files
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Also write a spreadsheet export
    #[arg(long)]
    xlsx: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Validate(args) => run_validate(&config, &args),
        Commands::Health => {
            let state = AppState::initialize(config)?;
            let health = state.console_health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
        Commands::Run(args) => run_batch(config, args).await,
    }
}

fn run_validate(config: &AppConfig, args: &InputArgs) -> Result<()> {
    let draft = read_draft(args)?;
    let result = validate(draft.raw_text(), &config.profile_marker);
    if result.is_blank() {
        println!("Please enter at least one link.");
        return Ok(());
    }
    println!(
        "{} valid, {} invalid",
        result.valid.len(),
        result.invalid.len()
    );
    print!("{}", invalid_lines(&result.invalid));
    Ok(())
}

fn invalid_lines(invalid: &[String]) -> String {
    invalid
        .iter()
        .map(|line| format!("  invalid: {line}\n"))
        .collect()
}

async fn run_batch(config: AppConfig, args: RunArgs) -> Result<()> {
    let draft = read_draft(&args.input)?;
    let stem = config.export_file_stem.clone();
    let options = RunOptions::from_config(&config)
        .with_endpoint(args.endpoint)
        .with_timeout_ms(args.timeout_ms);
    let state = AppState::initialize(config)?;

    let spinner = phase_spinner();
    let bar = spinner.clone();
    let observer: PhaseObserver = Arc::new(move |phase: SubmissionPhase| {
        bar.set_message(format!("{} ({}%)", phase.label(), phase.progress_percent()));
    });

    let outcome = state.run_batch(&draft, &options, Some(observer)).await;
    spinner.finish_and_clear();

    let report = match outcome {
        Ok(report) => report,
        Err(AppError::ValidationEmpty { invalid }) if invalid.is_empty() => {
            println!("Please enter at least one link.");
            return Ok(());
        }
        Err(AppError::ValidationEmpty { invalid }) => {
            eprint!("{}", invalid_lines(&invalid));
            return Err(AppError::ValidationEmpty { invalid }).context("lead generation failed");
        }
        Err(err) => return Err(err).context("lead generation failed"),
    };

    println!("{}", report.message());
    println!("{}", serde_json::to_string_pretty(&report.summary)?);

    let mut formats = vec![ExportFormat::Csv];
    if args.xlsx {
        formats.push(ExportFormat::Xlsx);
    }
    if !report.result.records.is_empty() {
        for file in write_exports(&report, &formats, &args.out_dir, &stem)? {
            println!("wrote {} ({} bytes)", file.path.display(), file.bytes);
        }
    }
    Ok(())
}

fn read_draft(args: &InputArgs) -> Result<BatchDraft> {
    if args.example {
        return Ok(BatchDraft::with_example());
    }
    let text = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            text
        }
    };
    Ok(BatchDraft::new(text))
}

fn phase_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
