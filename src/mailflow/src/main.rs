//! Mailflow — LLM-assisted email campaign automation.
//!
//! Entry point: wires configuration, the model and delivery backends, and
//! either serves the HTTP API or runs a single campaign from local files.

use clap::{Parser, Subcommand};
use mailflow_api::ApiServer;
use mailflow_core::config::{AppConfig, DeliveryProviderKind};
use mailflow_core::types::CampaignStatus;
use mailflow_delivery::{DeliveryProvider, NoopProvider, SendGridProvider, SmtpProvider};
use mailflow_llm::{ChatModel, OpenAiClient, ScriptedModel};
use mailflow_orchestrator::{CampaignRegistry, Orchestrator};
use mailflow_tracking::{ActivityLog, MessageIndex, WebhookProcessor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mailflow")]
#[command(about = "LLM-assisted email campaign automation")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "MAILFLOW__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Data directory for the activity log (overrides config)
    #[arg(long, env = "MAILFLOW__STORAGE__DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server (default)
    Serve,
    /// Run one campaign from local files and print the report
    Run {
        /// Brief text file, or a directory of brief files to run in turn
        #[arg(long)]
        brief_file: PathBuf,

        /// Path to the audience CSV
        #[arg(long)]
        audience_file: PathBuf,

        /// Campaign name (defaults to the brief file stem)
        #[arg(long)]
        name: Option<String>,

        /// Skip real delivery, record sends locally
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailflow=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!(
        http_port = config.api.http_port,
        data_dir = %config.storage.data_dir,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Run {
            brief_file,
            audience_file,
            name,
            dry_run,
        } => run_once(config, &brief_file, &audience_file, name, dry_run).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let model = build_model(&config)?;
    let provider = build_provider(&config, false)?;
    let activity = Arc::new(ActivityLog::open(&config.storage.data_dir)?);
    let messages = Arc::new(MessageIndex::new());
    let webhooks = Arc::new(WebhookProcessor::new(
        Arc::clone(&activity),
        Arc::clone(&messages),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        model,
        provider,
        activity,
        messages,
        Arc::new(CampaignRegistry::new()),
    ));

    let api_server = ApiServer::new(Arc::clone(&config), orchestrator, webhooks);
    if let Err(e) = api_server.start_metrics().await {
        warn!(error = %e, "Failed to start metrics exporter");
    }

    info!("Mailflow is ready to serve traffic");
    api_server.start_http().await
}

async fn run_once(
    config: AppConfig,
    brief_file: &Path,
    audience_file: &Path,
    name: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let jobs: Vec<(String, String)> = if brief_file.is_dir() {
        mailflow_audience::load_briefs(brief_file)?
            .into_iter()
            .map(|b| (b.name, b.brief))
            .collect()
    } else {
        let brief = std::fs::read_to_string(brief_file)?;
        let name = name.unwrap_or_else(|| {
            brief_file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "campaign".to_string())
        });
        vec![(name, brief.trim().to_string())]
    };
    if jobs.is_empty() {
        anyhow::bail!("no campaign briefs found in {}", brief_file.display());
    }

    let audience =
        mailflow_audience::load_audience(audience_file, config.audience.on_malformed_row)?;
    info!(campaigns = jobs.len(), audience = audience.len(), dry_run, "Running campaigns");

    let config = Arc::new(config);
    let model = build_model(&config)?;
    let provider = build_provider(&config, dry_run)?;
    let activity = Arc::new(ActivityLog::open(&config.storage.data_dir)?);

    let orchestrator = Orchestrator::new(
        Arc::clone(&config),
        model,
        provider,
        activity,
        Arc::new(MessageIndex::new()),
        Arc::new(CampaignRegistry::new()),
    );

    let mut failed = false;
    for (name, brief) in jobs {
        let record = orchestrator.run_new(name, brief, audience.clone()).await?;
        match &record.report {
            Some(report) => println!("{}", serde_json::to_string_pretty(report)?),
            None => println!("{}", serde_json::to_string_pretty(&record)?),
        }
        if record.status == CampaignStatus::Error {
            warn!(
                campaign_id = %record.campaign_id,
                stage = record.stage.as_str(),
                error = record.error.as_deref().unwrap_or("unknown"),
                "Campaign failed"
            );
            failed = true;
        }
    }
    if failed {
        anyhow::bail!("one or more campaigns failed");
    }
    Ok(())
}

fn build_model(config: &AppConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    if config.llm.api_key.is_empty() {
        warn!("No LLM API key configured, using canned offline completions");
        Ok(Arc::new(ScriptedModel::offline()))
    } else {
        Ok(Arc::new(OpenAiClient::new(&config.llm)?))
    }
}

fn build_provider(config: &AppConfig, dry_run: bool) -> anyhow::Result<Arc<dyn DeliveryProvider>> {
    if dry_run {
        info!("Dry run: deliveries will be recorded, not sent");
        return Ok(Arc::new(NoopProvider));
    }
    match config.delivery_provider() {
        DeliveryProviderKind::VendorApi => {
            info!(from = %config.sendgrid.from_email, "Using SendGrid delivery");
            Ok(Arc::new(SendGridProvider::new(
                config.sendgrid.clone(),
                Duration::from_secs(30),
            )?))
        }
        DeliveryProviderKind::Smtp if !config.smtp.sender_email.is_empty() => {
            info!(server = %config.smtp.server, "Using SMTP delivery");
            Ok(Arc::new(SmtpProvider::new(&config.smtp)?))
        }
        DeliveryProviderKind::Smtp => {
            warn!("No delivery credentials configured, sends will be recorded only");
            Ok(Arc::new(NoopProvider))
        }
    }
}
