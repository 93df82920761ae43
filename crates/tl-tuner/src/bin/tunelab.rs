use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tl_remote::{ClientConfig, HttpStore, MemoryStore, MemoryStoreConfig, RemoteStore};
use tl_tuner::{init_logging, LogFormat, Tuner, TunerOptions, DEFAULT_LOG_LEVEL};
use tl_types::{Assignment, ExperimentSpec};

#[derive(Parser)]
#[command(name = "tunelab", version, about = "Drive a remote hyperparameter tuning experiment")]
struct Cli {
    /// Experiment name (every command except `create`).
    #[arg(long, short = 'e', global = true)]
    experiment: Option<String>,
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    token: Option<String>,
    /// Use the in-process store, persisted to --state.
    #[arg(long, global = true)]
    offline: bool,
    #[arg(long, global = true, default_value = ".tunelab-offline.json")]
    state: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an experiment from a JSON description file.
    Create {
        #[arg(long)]
        spec: PathBuf,
    },
    Suggest,
    Update {
        /// Parameter values as a JSON object.
        #[arg(long)]
        params: String,
        #[arg(
            long,
            allow_negative_numbers = true,
            conflicts_with = "failed",
            required_unless_present = "failed"
        )]
        outcome: Option<f64>,
        /// Report the job as infeasible.
        #[arg(long)]
        failed: bool,
    },
    Cancel {
        #[arg(long = "params", required = true)]
        params: Vec<String>,
    },
    Pending,
    Best,
    Id {
        #[arg(long)]
        params: String,
    },
    Status,
    Delete,
}

fn parse_assignment(raw: &str) -> Result<Assignment> {
    serde_json::from_str(raw)
        .with_context(|| format!("--params is not a JSON object of values: {raw}"))
}

fn read_spec(path: &Path) -> Result<ExperimentSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(ExperimentSpec::from_json(&value)?)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, giving up on the pending suggestion");
            token.cancel();
        }
    });
}

async fn execute<S: RemoteStore>(cli: &Cli, store: S) -> Result<Value> {
    let options = TunerOptions::default();

    if let Commands::Create { spec } = &cli.command {
        let spec = read_spec(spec)?;
        let tuner = Tuner::create(store, spec, options).await?;
        return Ok(json!({ "experiment_id": tuner.experiment_id().await }));
    }

    let name = cli
        .experiment
        .as_deref()
        .context("--experiment is required for this command")?;
    let tuner = Tuner::open(store, name, options).await?;

    let output = match &cli.command {
        Commands::Create { .. } => bail!("create does not take an existing experiment"),
        Commands::Suggest => {
            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            serde_json::to_value(tuner.suggest_with(&cancel).await?)?
        }
        Commands::Update {
            params,
            outcome,
            failed,
        } => {
            let values = parse_assignment(params)?;
            let id = match (*failed, *outcome) {
                (true, _) => tuner.update_as_failed(&values).await?,
                (false, Some(outcome)) => tuner.update(&values, outcome).await?,
                (false, None) => bail!("pass --outcome or --failed"),
            };
            json!({ "result_id": id })
        }
        Commands::Cancel { params } => {
            let jobs = params
                .iter()
                .map(|raw| parse_assignment(raw))
                .collect::<Result<Vec<_>>>()?;
            let cancelled = tuner.cancel(&jobs).await?;
            json!({ "cancelled": cancelled })
        }
        Commands::Pending => serde_json::to_value(tuner.pending().await?)?,
        Commands::Best => serde_json::to_value(tuner.best().await?)?,
        Commands::Id { params } => {
            let id = tuner.get_id(&parse_assignment(params)?).await?;
            json!({ "result_id": id })
        }
        Commands::Status => {
            let snapshot = tuner.snapshot().await?;
            json!({
                "experiment_id": snapshot.experiment_id,
                "store": tuner.store().name(),
                "outcome": snapshot.outcome_name,
                "parameters": serde_json::to_value(&snapshot.parameters)?,
                "jobs": serde_json::to_value(snapshot.jobs())?,
            })
        }
        Commands::Delete => {
            tuner.delete_experiment().await?;
            json!({ "deleted": name })
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.into(), DEFAULT_LOG_LEVEL)?;

    let output = if cli.offline {
        let config = MemoryStoreConfig {
            fill_after_polls: 0,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::load(config, &cli.state)?);
        let result = execute(&cli, Arc::clone(&store)).await;
        store.save(&cli.state)?;
        info!(path = %cli.state.display(), "saved offline state");
        result?
    } else {
        let mut config = ClientConfig::load()?;
        if let Some(url) = &cli.api_url {
            config = config.with_api_url(url);
        }
        if let Some(token) = &cli.token {
            config = config.with_access_token(token);
        }
        execute(&cli, HttpStore::new(&config)?).await?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
