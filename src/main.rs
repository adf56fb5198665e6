use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use critic_core::{CriticError, FileConfig, Settings};
use critic_review::github::GitHubClient;
use critic_review::llm::LlmClient;
use critic_review::pipeline::ReviewPipeline;
use critic_review::publish::{CommentSink, StdoutSink};

const DEFAULT_CONFIG_FILE: &str = ".critic.toml";

#[derive(Parser)]
#[command(
    name = "critic",
    version,
    about = "LLM-assisted pull request review",
    long_about = "Reviews the changes of one pull request with a language model and posts\n\
                   the result as pull request comments. Meant to run once per CI event.\n\n\
                   Settings come from the environment (API_KEY, SOURCE_HOST_TOKEN,\n\
                   PULL_REQUEST_ID, REPOSITORY, MODEL, MODE, ...), layered over an\n\
                   optional .critic.toml.\n\n\
                   Examples:\n  \
                     critic                      Review the PR and post comments\n  \
                     critic --dry-run            Print the comments instead of posting\n  \
                     critic --format json        Emit the run report as JSON"
)]
struct Cli {
    /// Path to configuration file (default: .critic.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print comments to stdout instead of posting them
    #[arg(long)]
    dry_run: bool,

    /// Format of the final run report
    #[arg(long, default_value = "text")]
    format: ReportFormat,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let file_config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                FileConfig::from_file(default_path)?
            } else {
                FileConfig::default()
            }
        }
    };

    let Settings {
        request,
        credentials,
    } = Settings::from_env(&file_config)?;
    debug!(?request, "configuration loaded");

    let github = Arc::new(GitHubClient::new(
        &credentials.source_host_token,
        &request.source_host_base_url,
    )?);
    let completer = Arc::new(LlmClient::new(
        &request.completion_base_url,
        &credentials.api_key,
    )?);
    let sink: Arc<dyn CommentSink> = if cli.dry_run {
        info!("dry run, comments will be printed instead of posted");
        Arc::new(StdoutSink)
    } else {
        github.clone()
    };

    let pipeline = ReviewPipeline::new(request, github, completer, sink)?;
    let report = pipeline.run().await?;

    match cli.format {
        ReportFormat::Text => println!("{report}"),
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(&report).map_err(CriticError::from)?;
            println!("{json}");
        }
    }

    if let Some(cause) = report.failure_cause() {
        eprintln!("error: {cause}");
        std::process::exit(1);
    }

    Ok(())
}
