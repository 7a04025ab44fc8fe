//! The controller agent: one reconciliation pass per trigger.
//!
//! A pass:
//! - Records the trigger as pending
//! - Performs leader duties (election, secret, accounting-database location)
//! - Keeps the local secret file in step with leader settings
//! - Publishes this unit's addressing to the HA peer
//! - Gathers inputs and runs the engine
//! - Applies the local activation, then propagates downstream
//! - Persists the outcome

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use slurmha_events::{EventKind, TriggerEnvelope};
use slurmha_names::UnitName;
use slurmha_reconcile::{
    keys, Activation, ConfigDigest, ControllerState, DbdLocation, LeaderView, PassInputs,
    PassOutcome, ReconciliationEngine, RelationData, Role, StaticConfig, Transition, UnitStatus,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::activation::{ActivationError, Activator, Service};
use crate::config::{load_static_config, Config};
use crate::leader::LeaderSettings;
use crate::relations::RelationStore;
use crate::secret::SecretSource;
use crate::state::{ControllerRecord, StateStore};

/// Static config key naming the scheduler's state save directory.
pub const STATE_SAVE_LOCATION_KEY: &str = "state_save_location";

/// Default state save directory.
pub const DEFAULT_STATE_SAVE_LOCATION: &str = "/var/spool/slurmctld";

/// Result of handling one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub event: EventKind,
    pub transition: Transition,
    pub state: ControllerState,
    /// Status reported after the pass.
    pub status: Option<UnitStatus>,
    pub role: Option<Role>,
    /// Local activation failure, if any. Downstream propagation has
    /// already happened when this is set.
    pub activation_error: Option<String>,
}

/// Runs reconciliation passes against live collaborators.
pub struct ControllerAgent {
    config: Config,
    engine: ReconciliationEngine,
    store: Mutex<StateStore>,
    relations: Arc<dyn RelationStore>,
    leader: Arc<dyn LeaderSettings>,
    activator: Arc<dyn Activator>,
    secrets: Arc<dyn SecretSource>,
}

impl ControllerAgent {
    /// Create a new agent.
    pub fn new(
        config: Config,
        store: StateStore,
        relations: Arc<dyn RelationStore>,
        leader: Arc<dyn LeaderSettings>,
        activator: Arc<dyn Activator>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            config,
            engine: ReconciliationEngine::new(),
            store: Mutex::new(store),
            relations,
            leader,
            activator,
            secrets,
        }
    }

    /// One-time host setup: keep the worker daemon off this host and
    /// install the shared secret if one is published.
    ///
    /// Returns `false` if setup had already run.
    pub async fn setup(&self) -> Result<bool> {
        if self.store.lock().await.get_controller_record()?.setup_done {
            debug!("Setup already done");
            return Ok(false);
        }

        self.activator.pause(Service::Slurmd).await?;
        let secret = self.leader.get(keys::MUNGE_KEY).await?;
        self.install_secret(secret.as_deref()).await?;
        self.store.lock().await.mark_setup_done()?;

        info!(unit = %self.config.unit_name, "Setup complete");
        Ok(true)
    }

    /// Persisted controller state.
    pub async fn status(&self) -> Result<ControllerRecord> {
        Ok(self.store.lock().await.get_controller_record()?)
    }

    /// Handle one trigger.
    pub async fn handle(&self, event: EventKind) -> Result<PassReport> {
        let envelope = TriggerEnvelope::new(event, self.config.unit_name.clone());
        info!(
            event = %event,
            source = %envelope.source(),
            unit = %self.config.unit_name,
            "Handling trigger"
        );
        self.store.lock().await.add_pending(&envelope)?;

        self.leader_duties(event).await?;

        // Installing the secret is local activation: a failure is reported
        // with the pass result and never keeps the pass from propagating.
        let secret = self.leader.get(keys::MUNGE_KEY).await?;
        let secret_result = self.install_secret(secret.as_deref()).await;
        if let Err(e) = &secret_result {
            warn!(error = %e, "Failed to install shared secret");
        }

        let network_details = self.relations.network_details().await?;
        self.relations
            .provide_peer_data(&network_details)
            .await
            .context("Failed to publish peer data")?;

        let (record, inputs) = self.gather(network_details).await?;
        let mut outcome = self.engine.run(event, &inputs);

        if outcome.transition == Transition::Defer {
            return Ok(PassReport {
                event,
                transition: outcome.transition,
                state: outcome.state,
                status: record.status,
                role: None,
                activation_error: secret_result.err().map(|e| e.to_string()),
            });
        }

        let activate_result = self
            .activate(&outcome, &inputs.static_config, record.rendered_digest.as_ref())
            .await;
        let activation_error = match secret_result.and(activate_result) {
            Ok(()) => {
                outcome.activation_finished(Ok(()));
                None
            }
            Err(e) => {
                warn!(error = %e, "Local activation failed");
                outcome.activation_finished(Err(e.to_string()));
                Some(e.to_string())
            }
        };

        // Workers hear from us even when local activation failed.
        if let Some(outbound) = &outcome.downstream {
            self.relations
                .send_downstream(outbound)
                .await
                .context("Failed to propagate config downstream")?;
        }

        self.persist(&outcome, activation_error.is_none())
            .await?;

        if let Some(status) = &outcome.status {
            info!(
                state = %outcome.state,
                workload = status.workload_state(),
                message = %status.message(),
                "Status updated"
            );
        }

        Ok(PassReport {
            event,
            transition: outcome.transition,
            state: outcome.state,
            status: outcome.status.or(record.status),
            role: outcome.role,
            activation_error,
        })
    }

    async fn leader_duties(&self, event: EventKind) -> Result<()> {
        if !self.leader.is_leader().await? {
            return Ok(());
        }

        if self.leader.get(keys::ACTIVE_CONTROLLER).await?.is_none() {
            let unit = self.config.unit_name.to_string();
            self.leader
                .set(keys::ACTIVE_CONTROLLER, Some(&unit))
                .await?;
            info!(active_controller = %unit, "Elected active controller");
        }

        if self.leader.get(keys::MUNGE_KEY).await?.is_none() {
            let secret = self.secrets.generate();
            self.leader.set(keys::MUNGE_KEY, Some(&secret)).await?;
            info!("Generated shared secret");
        }

        if event == EventKind::DbLocationChanged {
            match self.relations.dbd_location().await? {
                Some(location) => {
                    for (key, value) in location.to_settings() {
                        self.leader.set(key, Some(&value)).await?;
                    }
                    info!(host = %location.host, port = location.port, "Published accounting database location");
                }
                None => {
                    for key in [keys::DBD_HOST, keys::DBD_PORT, keys::DBD_IPADDR] {
                        self.leader.set(key, None).await?;
                    }
                    info!("Accounting database location withdrawn");
                }
            }
        }

        Ok(())
    }

    /// Write the published secret locally; restart munge when it changed,
    /// start it when it is not running.
    async fn install_secret(&self, secret: Option<&str>) -> Result<(), ActivationError> {
        let Some(secret) = secret else {
            return Ok(());
        };

        if self.activator.write_secret(secret).await? {
            info!("Shared secret changed; restarting munge");
            self.activator.restart(Service::Munge).await?;
        } else if !self.activator.is_running(Service::Munge).await? {
            info!("munge not running; starting it");
            self.activator.start(Service::Munge).await?;
        }
        Ok(())
    }

    async fn gather(&self, network_details: RelationData) -> Result<(ControllerRecord, PassInputs)> {
        let (record, pending) = {
            let store = self.store.lock().await;
            let record = store.get_controller_record()?;
            let pending: BTreeSet<EventKind> =
                store.pending()?.into_iter().map(|p| p.kind).collect();
            (record, pending)
        };

        let settings = self.leader.all().await?;
        let active_controller = settings
            .get(keys::ACTIVE_CONTROLLER)
            .map(|s| s.parse::<UnitName>())
            .transpose()
            .context("Leader settings hold an invalid active controller")?;
        let leader = LeaderView {
            active_controller,
            secret: settings.get(keys::MUNGE_KEY).cloned(),
            dbd: DbdLocation::from_settings(|key| settings.get(key).cloned()),
        };

        let inputs = PassInputs {
            local_unit: self.config.unit_name.clone(),
            state: record.state,
            pending,
            leader,
            static_config: load_static_config(&self.config.static_config_path)?,
            membership_joined: self.relations.membership_joined().await?,
            nodes: self.relations.node_inventory().await?,
            network_details,
            peer_data: self.relations.peer_data().await?,
            previous_stamp: record.change_stamp,
            now: Utc::now(),
        };

        Ok((record, inputs))
    }

    /// Carry out the pass's local activation.
    ///
    /// A running slurmctld is restarted when the rendered file changed or
    /// when the new config differs from the last one known to be active,
    /// which also retries a restart that failed after a successful render.
    async fn activate(
        &self,
        outcome: &PassOutcome,
        static_config: &StaticConfig,
        active_digest: Option<&ConfigDigest>,
    ) -> Result<(), ActivationError> {
        match &outcome.activation {
            Activation::Apply(config) => {
                self.activator
                    .create_state_save_location(&state_save_location(static_config))
                    .await?;
                let changed = self.activator.render(config).await?;
                let digest_moved = outcome.digest.as_ref() != active_digest;

                if !self.activator.is_running(Service::Slurmctld).await? {
                    self.activator.start(Service::Slurmctld).await?;
                } else if changed || digest_moved {
                    info!("Controller config changed; restarting slurmctld");
                    self.activator.restart(Service::Slurmctld).await?;
                }
                Ok(())
            }
            Activation::Stop => {
                if self.activator.is_running(Service::Slurmctld).await? {
                    self.activator.stop(Service::Slurmctld).await?;
                }
                Ok(())
            }
            Activation::Withhold | Activation::Unchanged => Ok(()),
        }
    }

    async fn persist(&self, outcome: &PassOutcome, activation_ok: bool) -> Result<()> {
        let store = self.store.lock().await;

        store.set_state(outcome.state)?;
        if let Some(status) = &outcome.status {
            store.set_status(status)?;
        }
        if let Some(stamp) = outcome.change_stamp {
            store.set_change_stamp(stamp)?;
        }
        if let (Activation::Apply(_), Some(digest), true) =
            (&outcome.activation, &outcome.digest, activation_ok)
        {
            store.set_rendered_digest(digest)?;
        }
        if outcome.clear_pending {
            store.clear_pending()?;
        }
        Ok(())
    }
}

fn state_save_location(static_config: &StaticConfig) -> PathBuf {
    match static_config.get(STATE_SAVE_LOCATION_KEY) {
        Some(Value::String(path)) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_STATE_SAVE_LOCATION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_save_location() {
        let mut config = StaticConfig::new();
        assert_eq!(
            state_save_location(&config),
            PathBuf::from(DEFAULT_STATE_SAVE_LOCATION)
        );

        config.insert(STATE_SAVE_LOCATION_KEY.to_string(), json!("/srv/slurm/state"));
        assert_eq!(state_save_location(&config), PathBuf::from("/srv/slurm/state"));

        config.insert(STATE_SAVE_LOCATION_KEY.to_string(), json!(""));
        assert_eq!(
            state_save_location(&config),
            PathBuf::from(DEFAULT_STATE_SAVE_LOCATION)
        );
    }
}
