use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use careerpath_client::codec::{AllowList, DownloadDir, UploadCandidate};
use careerpath_client::config::Config;
use careerpath_client::prediction::{ScoreInputs, StudentProfile};
use careerpath_client::service::HttpTransport;
use careerpath_client::{PredictorSession, RequestState};

#[derive(Parser)]
#[command(name = "careerpath", version, about = "Career path prediction client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the prediction service is up
    Health,
    /// Compute the Academic Performance Index
    Score {
        #[arg(long, default_value_t = 7.5)]
        cgpa: f64,
        #[arg(long, default_value_t = 1)]
        paid_internships: u32,
        #[arg(long, default_value_t = 0)]
        unpaid_internships: u32,
        #[arg(long, default_value_t = 2)]
        research_papers: u32,
        #[arg(long, default_value_t = 5)]
        certificates: u32,
    },
    /// Predict a whole spreadsheet and save the annotated result
    Batch { file: PathBuf },
    /// Compare predicted results against ground truth
    Compare {
        #[arg(long)]
        predicted: Option<PathBuf>,
        #[arg(long)]
        truth: Option<PathBuf>,
    },
    /// Compare career outcomes across up to four years
    Trend {
        #[arg(long)]
        year1: Option<PathBuf>,
        #[arg(long)]
        year2: Option<PathBuf>,
        #[arg(long)]
        year3: Option<PathBuf>,
        #[arg(long)]
        year4: Option<PathBuf>,
    },
    /// Predict one student profile read from a JSON file
    Predict { profile: PathBuf },
    /// Chat with the career assistant, one message per stdin line
    Chat {
        /// Profile JSON to predict first, so replies use its result as context
        #[arg(long)]
        profile: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Logs go to stderr; stdout carries chart data only.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "careerpath={0},careerpath_client={0}",
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting careerpath v{}", env!("CARGO_PKG_VERSION"));
    info!("Prediction service: {}", config.api_url);

    let transport = Arc::new(HttpTransport::new(&config)?);
    let session = PredictorSession::new(transport, DownloadDir::new(config.download_dir.clone()));

    match cli.command {
        Command::Health => emit(session.check_health().await),
        Command::Score {
            cgpa,
            paid_internships,
            unpaid_internships,
            research_papers,
            certificates,
        } => {
            let inputs = ScoreInputs {
                cgpa,
                paid_internships,
                unpaid_internships,
                research_papers,
                certificates,
            };
            let state = session.compute_score(&inputs).await;
            emit(state.map(|report| {
                serde_json::json!({
                    "breakdown_chart": report.breakdown_series(),
                    "report": report,
                })
            }))
        }
        Command::Batch { file } => {
            let candidate = match UploadCandidate::from_path(&file, AllowList::Excel).await {
                Ok(c) => c,
                Err(e) => bail!("{}: {}", e.code(), e.user_message()),
            };
            emit(session.predict_batch(Some(candidate)).await)
        }
        Command::Compare { predicted, truth } => {
            let allow = AllowList::ExcelOrCsv;
            let predicted = load_optional(predicted.as_deref(), allow).await?;
            let truth = load_optional(truth.as_deref(), allow).await?;
            emit(session.compare(predicted, truth).await)
        }
        Command::Trend {
            year1,
            year2,
            year3,
            year4,
        } => {
            let mut years = Vec::new();
            for path in [year1, year2, year3, year4] {
                years.push(load_optional(path.as_deref(), AllowList::Excel).await?);
            }
            emit(session.multi_year(years).await)
        }
        Command::Predict { profile } => {
            let profile = read_profile(&profile).await?;
            let state = session.predict_individual(&profile).await;
            emit(state.map(|p| {
                serde_json::json!({
                    "headline": p.headline(),
                    "probability_chart": p.probability_series().to_percent(),
                    "top_factors": p.top_factors(5),
                    "result": p,
                })
            }))
        }
        Command::Chat { profile } => {
            if let Some(path) = profile {
                let profile = read_profile(&path).await?;
                if let Some(failure) = session.predict_individual(&profile).await.failure() {
                    bail!("{failure}");
                }
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let reply = session
                    .chat
                    .send(&line)
                    .await
                    .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e.user_message()))?;
                println!("{reply}");
            }
            Ok(())
        }
    }
}

async fn load_optional(path: Option<&Path>, allow: AllowList) -> Result<Option<UploadCandidate>> {
    let Some(path) = path else {
        return Ok(None);
    };
    match UploadCandidate::from_path(path, allow).await {
        Ok(candidate) => Ok(Some(candidate)),
        Err(e) => bail!("{}: {}", e.code(), e.user_message()),
    }
}

async fn read_profile(path: &Path) -> Result<StudentProfile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid profile JSON in {}", path.display()))
}

/// Prints a succeeded value as JSON, or fails with `code: message`.
fn emit<T: Serialize>(state: RequestState<T>) -> Result<()> {
    match state {
        RequestState::Succeeded(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        RequestState::Failed(failure) => bail!("{failure}"),
        RequestState::Idle | RequestState::Pending => bail!("request did not settle"),
    }
}
