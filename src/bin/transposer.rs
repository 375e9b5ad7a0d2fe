use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ensemble_transposer::app::App;
use ensemble_transposer::cache::{DatasetService, MemoryCache};
use ensemble_transposer::error::TransposeError;
use ensemble_transposer::fetch::HttpFetcher;
use ensemble_transposer::manifest::{EnvSecrets, ManifestLoader};
use ensemble_transposer::output::{JsonOutput, OutputMode};
use ensemble_transposer::server::run_server;
use ensemble_transposer::store::FileStore;

#[derive(Parser)]
#[command(name = "transposer")]
#[command(about = "Normalize telemetry exports into dataset/category/metric documents")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(
        long,
        global = true,
        env = "TRANSPOSER_MANIFESTS",
        default_value = "config/datasets"
    )]
    manifests: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Normalize datasets and write every document under the output root")]
    Run(RunArgs),
    #[command(about = "Serve normalized datasets over HTTP")]
    Serve(ServeArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Datasets to process; all manifests when omitted.
    datasets: Vec<String>,

    #[arg(long, env = "TRANSPOSER_OUTPUT", default_value = "target")]
    output: String,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    #[arg(long, env = "CACHE_SECONDS", default_value_t = 1)]
    cache_seconds: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<TransposeError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &TransposeError) -> u8 {
    if error.is_not_found() || error.is_configuration() {
        2
    } else if error.is_fetch() {
        3
    } else {
        1
    }
}

async fn run() -> miette::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_datasets(cli.manifests, args, output_mode).await,
        Commands::Serve(args) => {
            let service = DatasetService::new(
                cli.manifests,
                HttpFetcher::new()?,
                Arc::new(EnvSecrets),
                MemoryCache::new(),
                Duration::from_secs(args.cache_seconds),
            );
            run_server(Arc::new(service), &args.host, args.port).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_datasets(
    manifests: PathBuf,
    args: RunArgs,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let mut loaded = ManifestLoader::load_dir(&manifests)?;
    if !args.datasets.is_empty() {
        if let Some(missing) = args
            .datasets
            .iter()
            .find(|name| !loaded.iter().any(|(dataset, _)| dataset == *name))
        {
            return Err(TransposeError::DatasetNotFound(missing.clone()).into());
        }
        loaded.retain(|(dataset, _)| args.datasets.contains(dataset));
    }

    let app = App::new(
        HttpFetcher::new()?,
        FileStore::new(args.output),
        Arc::new(EnvSecrets),
    );
    let sink = output_mode.sink();
    let report = app.process_all(&loaded, sink.as_ref()).await;
    JsonOutput::print_report(&report).into_diagnostic()?;

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
