//! slurm-controller - HA slurm controller agent
//!
//! Invoked once per trigger by the host's orchestration layer:
//!
//! ```text
//! slurm-controller setup
//! slurm-controller handle membership-changed
//! slurm-controller status
//! ```
//!
//! Configuration comes from `SLURMHA_*` environment variables.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use slurmha_controller::activation::{Activator, MockActivator, SystemdActivator};
use slurmha_controller::config::Config;
use slurmha_controller::leader::FileLeadership;
use slurmha_controller::relations::FileRelations;
use slurmha_controller::secret::RandomSecret;
use slurmha_controller::state::StateStore;
use slurmha_controller::ControllerAgent;
use slurmha_events::EventKind;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HA slurm controller agent.
#[derive(Debug, Parser)]
#[command(name = "slurm-controller")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one-time host setup.
    Setup,

    /// Run a reconciliation pass for a trigger.
    Handle {
        /// Trigger kind (e.g. membership-changed, peer-departed).
        event: EventKind,
    },

    /// Print the persisted controller state as JSON.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Logs go to stderr so `status` output stays parseable.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(
        unit = %config.unit_name,
        is_leader = config.is_leader,
        data_dir = %config.data_dir.display(),
        relation_dir = %config.unit_relation_dir().display(),
        leader_dir = %config.leader_dir.display(),
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let agent = build_agent(config)?;

    match cli.command {
        Commands::Setup => {
            agent.setup().await?;
        }
        Commands::Handle { event } => {
            let report = agent.handle(event).await?;
            if let Some(error) = &report.activation_error {
                error!(event = %event, error = %error, "Pass finished with activation failure");
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let record = agent.status().await?;
            let output = json!({
                "state": record.state,
                "workload_state": record.status.as_ref().map(|s| s.workload_state()),
                "message": record.status.as_ref().map(|s| s.message()),
                "change_stamp": record.change_stamp,
                "rendered_digest": record.rendered_digest.as_ref().map(|d| d.as_str()),
                "setup_done": record.setup_done,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn build_agent(config: Config) -> Result<ControllerAgent> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;
    let store = StateStore::open(config.state_db_path()).context("Failed to open state store")?;

    let relations = Arc::new(FileRelations::new(config.unit_relation_dir()));
    let leader = Arc::new(FileLeadership::new(&config.leader_dir, config.is_leader));
    let activator: Arc<dyn Activator> = if config.dev_mode {
        Arc::new(MockActivator::new())
    } else {
        Arc::new(SystemdActivator::new(
            config.rendered_config_path.clone(),
            config.munge_key_path.clone(),
        ))
    };

    Ok(ControllerAgent::new(
        config,
        store,
        relations,
        leader,
        activator,
        Arc::new(RandomSecret),
    ))
}
