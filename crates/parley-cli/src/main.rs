use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;

use parley_core::config::Config;
use parley_core::types::{PipelineMode, VoiceInput, VoiceRequest};
use parley_gateway::GatewayState;
use parley_gateway::session::render;

mod logging;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Real-time voice translation chat backend",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Validate config and probe provider credentials
    Check,

    /// Translate one text message through the full pipeline
    Translate {
        /// Text to translate
        #[arg(short, long)]
        text: String,

        #[arg(long, default_value = "en")]
        source: String,

        #[arg(long, default_value = "es")]
        target: String,

        /// simple, streaming or parallel
        #[arg(long, default_value = "simple")]
        mode: PipelineMode,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for errors
    Validate,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .as_deref()
        .map(Config::expand_path)
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load(&config_path)?;

    logging::init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            let gateway = config.gateway.get_or_insert_with(Default::default);
            if let Some(port) = port {
                gateway.port = port;
            }
            if bind.is_some() {
                gateway.bind = bind;
            }

            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("invalid configuration ({} errors)", errors.len());
            }

            tracing::info!(config = %config_path.display(), "Starting Parley gateway");
            let state = Arc::new(GatewayState::from_config(config)?);
            parley_gateway::start_gateway(state).await?;
        }
        Commands::Check => {
            check(&config, &config_path).await?;
        }
        Commands::Translate {
            text,
            source,
            target,
            mode,
        } => {
            let state = GatewayState::from_config(config)?;
            let request = VoiceRequest::new(VoiceInput::Text(text), source, target, "cli");
            let mut events = state.orchestrator.stream(request, mode);
            let mut failed = false;
            while let Some(event) = events.next().await {
                failed |= matches!(event, parley_pipeline::PipelineEvent::Failed { .. });
                for out in render(&event, mode) {
                    println!("{}", serde_json::to_string(&out)?);
                }
            }
            state.background().drain().await;
            if failed {
                anyhow::bail!("translation failed");
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config errors", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                if let Some(dir) = config_path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                Config::default().save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn check(config: &Config, config_path: &Path) -> anyhow::Result<()> {
    println!("Parley v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());

    let (warnings, errors) = config.validate();
    for w in &warnings {
        println!("  warning: {w}");
    }
    for e in &errors {
        println!("  error: {e}");
    }

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let reports = parley_providers::probe::probe_all(&client, config).await;

    println!();
    for report in &reports {
        match &report.outcome {
            Ok(detail) => println!("  ok    {:<12} {:<15} {detail}", report.service.as_str(), report.provider),
            Err(e) => println!("  FAIL  {:<12} {:<15} {e}", report.service.as_str(), report.provider),
        }
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 || !errors.is_empty() {
        anyhow::bail!("{failed} provider checks failed, {} config errors", errors.len());
    }
    println!("\nAll providers reachable");
    Ok(())
}
