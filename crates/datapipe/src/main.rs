use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datapipe::cleanup::{AwsCloud, Cleanup, StepStatus};
use datapipe_config::{LogFormat, RuntimeConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// Daily API extraction into S3, queryable from Athena
#[derive(Parser)]
#[command(name = "datapipe")]
#[command(version)]
#[command(about = "Deploy, run, check and tear down the datapipe extraction pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate infrastructure or ship function code
    Deploy {
        #[command(subcommand)]
        target: datapipe::deploy::DeployCommand,
    },
    /// Run the extractor once from this machine
    Extract(datapipe::extract::ExtractArgs),
    /// Invoke the deployed pipeline and follow the data through to Athena
    Check(datapipe::check::CheckArgs),
    /// Delete every resource the pipeline created
    Cleanup(CleanupArgs),
}

#[derive(clap::Args)]
struct CleanupArgs {
    /// AWS region (defaults to the SDK's region chain)
    #[arg(long)]
    region: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::load().context("Failed to load configuration")?,
    };
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    // The CLI talks to a terminal, never to a log shipper
    config.log.format = LogFormat::Text;
    datapipe_extract::init_tracing(&config.log);

    match cli.command {
        Commands::Deploy { target } => target.run(&config).map(|_| ExitCode::SUCCESS),
        Commands::Extract(args) => {
            block_on(datapipe::extract::run(args, &config)).map(|_| ExitCode::SUCCESS)
        }
        Commands::Check(args) => {
            let report = block_on(datapipe::check::run(args, &config))?;
            Ok(exit_code(report.all_passed()))
        }
        Commands::Cleanup(args) => block_on(run_cleanup(args, &config)),
    }
}

fn block_on<T>(future: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(future)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_cleanup(args: CleanupArgs, config: &RuntimeConfig) -> Result<ExitCode> {
    let names = config.resources.clone();

    println!();
    println!("datapipe cleanup - {}", names.stack_name);
    println!();

    if !args.yes {
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Delete stack {} and every bucket starting with '{}'?",
                names.stack_name, names.project_prefix
            ))
            .default(false)
            .interact()?;
        if !proceed {
            println!("Aborted.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let sdk_config = datapipe::load_sdk_config(args.region.as_deref()).await;
    let mut cleanup = Cleanup::new(AwsCloud::new(&sdk_config), names);
    let report = cleanup.run().await;

    println!();
    for outcome in &report.steps {
        let icon = match outcome.status {
            StepStatus::Done => "✅",
            StepStatus::Skipped => "➖",
            StepStatus::Failed(_) => "❌",
        };
        println!("{} {:<16} {}", icon, outcome.step.to_string(), outcome.detail);
        if let StepStatus::Failed(reason) = &outcome.status {
            println!("   {}", reason);
        }
    }

    println!();
    println!("Deleted {} resources and objects", report.deleted);
    if report.is_clean() {
        println!("🎉 All pipeline resources are gone");
    } else {
        println!("⚠️  Cleanup incomplete:");
        for leftover in &report.remaining {
            println!("   - {}", leftover);
        }
        println!("   Check the AWS console and re-run `datapipe cleanup`.");
    }

    Ok(exit_code(report.is_clean()))
}
