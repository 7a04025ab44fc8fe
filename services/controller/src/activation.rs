//! Local activation: rendering the controller config on this host and
//! driving the daemons that consume it.
//!
//! Two implementations:
//! - [`SystemdActivator`] writes files atomically and shells out to `systemctl`
//! - [`MockActivator`] records every call, for tests and development

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use slurmha_reconcile::ControllerConfig;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::fsutil::write_if_changed;

/// Daemons the controller host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Service {
    Slurmctld,
    Slurmd,
    Munge,
}

impl Service {
    /// systemd unit name.
    pub fn unit(&self) -> &'static str {
        match self {
            Service::Slurmctld => "slurmctld",
            Service::Slurmd => "slurmd",
            Service::Munge => "munge",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit())
    }
}

/// Errors from local activation.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("failed to render controller config: {0}")]
    Render(String),

    #[error("failed to write {path:?}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("systemctl {action} {service} failed: {message}")]
    Service {
        action: &'static str,
        service: Service,
        message: String,
    },

    #[error("mock activator configured to fail")]
    Mock,
}

/// Local activation interface.
#[async_trait]
pub trait Activator: Send + Sync {
    /// Render the config; returns whether the rendered file changed.
    async fn render(&self, config: &ControllerConfig) -> Result<bool, ActivationError>;

    /// Write the shared secret; returns whether it changed.
    async fn write_secret(&self, secret: &str) -> Result<bool, ActivationError>;

    /// Create the scheduler's state save directory.
    async fn create_state_save_location(&self, path: &Path) -> Result<(), ActivationError>;

    async fn start(&self, service: Service) -> Result<(), ActivationError>;

    async fn stop(&self, service: Service) -> Result<(), ActivationError>;

    async fn restart(&self, service: Service) -> Result<(), ActivationError>;

    /// Stop and disable so the service stays down across reboots.
    async fn pause(&self, service: Service) -> Result<(), ActivationError>;

    async fn is_running(&self, service: Service) -> Result<bool, ActivationError>;
}

/// Activation through files and systemd.
pub struct SystemdActivator {
    rendered_config_path: PathBuf,
    munge_key_path: PathBuf,
}

impl SystemdActivator {
    pub fn new(rendered_config_path: PathBuf, munge_key_path: PathBuf) -> Self {
        Self {
            rendered_config_path,
            munge_key_path,
        }
    }

    async fn systemctl(&self, args: &[&str]) -> std::io::Result<std::process::ExitStatus> {
        debug!(?args, "systemctl");
        Command::new("systemctl").args(args).status().await
    }

    async fn service_action(
        &self,
        action: &'static str,
        args: &[&str],
        service: Service,
    ) -> Result<(), ActivationError> {
        let mut full = args.to_vec();
        full.push(service.unit());

        let status = self
            .systemctl(&full)
            .await
            .map_err(|e| ActivationError::Service {
                action,
                service,
                message: e.to_string(),
            })?;

        if !status.success() {
            return Err(ActivationError::Service {
                action,
                service,
                message: format!("exited with {status}"),
            });
        }

        info!(%service, action, "Service action complete");
        Ok(())
    }
}

fn write_error(path: &Path, e: anyhow::Error) -> ActivationError {
    ActivationError::Write {
        path: path.to_path_buf(),
        message: format!("{e:#}"),
    }
}

#[async_trait]
impl Activator for SystemdActivator {
    async fn render(&self, config: &ControllerConfig) -> Result<bool, ActivationError> {
        let bytes = config
            .to_json_bytes()
            .map_err(|e| ActivationError::Render(e.to_string()))?;
        write_if_changed(&self.rendered_config_path, &bytes, 0o640)
            .await
            .map_err(|e| write_error(&self.rendered_config_path, e))
    }

    async fn write_secret(&self, secret: &str) -> Result<bool, ActivationError> {
        write_if_changed(&self.munge_key_path, secret.as_bytes(), 0o400)
            .await
            .map_err(|e| write_error(&self.munge_key_path, e))
    }

    async fn create_state_save_location(&self, path: &Path) -> Result<(), ActivationError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| write_error(path, e.into()))
    }

    async fn start(&self, service: Service) -> Result<(), ActivationError> {
        self.service_action("start", &["start"], service).await
    }

    async fn stop(&self, service: Service) -> Result<(), ActivationError> {
        self.service_action("stop", &["stop"], service).await
    }

    async fn restart(&self, service: Service) -> Result<(), ActivationError> {
        self.service_action("restart", &["restart"], service).await
    }

    async fn pause(&self, service: Service) -> Result<(), ActivationError> {
        self.service_action("pause", &["disable", "--now"], service)
            .await
    }

    async fn is_running(&self, service: Service) -> Result<bool, ActivationError> {
        let status = self
            .systemctl(&["is-active", "--quiet", service.unit()])
            .await
            .map_err(|e| ActivationError::Service {
                action: "is-active",
                service,
                message: e.to_string(),
            })?;
        Ok(status.success())
    }
}

/// One call received by [`MockActivator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationCall {
    Render { changed: bool },
    WriteSecret { changed: bool },
    CreateStateSaveLocation(PathBuf),
    Start(Service),
    Stop(Service),
    Restart(Service),
    Pause(Service),
}

#[derive(Debug, Default)]
struct MockState {
    rendered: Option<Vec<u8>>,
    secret: Option<String>,
    running: BTreeSet<Service>,
    failing: BTreeSet<Service>,
    calls: Vec<ActivationCall>,
}

/// Mock activator for testing and development.
#[derive(Debug, Default)]
pub struct MockActivator {
    state: Mutex<MockState>,
    fail_render: bool,
}

impl MockActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock activator whose renders all fail.
    pub fn failing() -> Self {
        Self {
            state: Mutex::default(),
            fail_render: true,
        }
    }

    /// Make start, stop and restart of `service` fail until recovered.
    pub fn fail_service(&self, service: Service) {
        self.with_state(|s| s.failing.insert(service));
    }

    pub fn recover_service(&self, service: Service) {
        self.with_state(|s| s.failing.remove(&service));
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<ActivationCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Forget recorded calls, keeping files and running services.
    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    /// The last rendered config, parsed back.
    pub fn rendered(&self) -> Option<serde_json::Value> {
        self.with_state(|s| s.rendered.clone())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn secret(&self) -> Option<String> {
        self.with_state(|s| s.secret.clone())
    }

    pub fn running(&self, service: Service) -> bool {
        self.with_state(|s| s.running.contains(&service))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        // A poisoned lock only means another test thread panicked.
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn check_service(&self, action: &'static str, service: Service) -> Result<(), ActivationError> {
        if self.with_state(|s| s.failing.contains(&service)) {
            return Err(ActivationError::Service {
                action,
                service,
                message: "mock service failure".to_string(),
            });
        }
        Ok(())
    }

    fn record(&self, call: ActivationCall) {
        info!(?call, "[MOCK] Activation call");
        self.with_state(|s| s.calls.push(call));
    }
}

#[async_trait]
impl Activator for MockActivator {
    async fn render(&self, config: &ControllerConfig) -> Result<bool, ActivationError> {
        if self.fail_render {
            return Err(ActivationError::Mock);
        }
        let bytes = config
            .to_json_bytes()
            .map_err(|e| ActivationError::Render(e.to_string()))?;
        let changed = self.with_state(|s| {
            let changed = s.rendered.as_deref() != Some(bytes.as_slice());
            s.rendered = Some(bytes);
            changed
        });
        self.record(ActivationCall::Render { changed });
        Ok(changed)
    }

    async fn write_secret(&self, secret: &str) -> Result<bool, ActivationError> {
        let changed = self.with_state(|s| {
            let changed = s.secret.as_deref() != Some(secret);
            s.secret = Some(secret.to_string());
            changed
        });
        self.record(ActivationCall::WriteSecret { changed });
        Ok(changed)
    }

    async fn create_state_save_location(&self, path: &Path) -> Result<(), ActivationError> {
        self.record(ActivationCall::CreateStateSaveLocation(path.to_path_buf()));
        Ok(())
    }

    async fn start(&self, service: Service) -> Result<(), ActivationError> {
        self.check_service("start", service)?;
        self.with_state(|s| s.running.insert(service));
        self.record(ActivationCall::Start(service));
        Ok(())
    }

    async fn stop(&self, service: Service) -> Result<(), ActivationError> {
        self.check_service("stop", service)?;
        self.with_state(|s| s.running.remove(&service));
        self.record(ActivationCall::Stop(service));
        Ok(())
    }

    async fn restart(&self, service: Service) -> Result<(), ActivationError> {
        self.check_service("restart", service)?;
        self.with_state(|s| s.running.insert(service));
        self.record(ActivationCall::Restart(service));
        Ok(())
    }

    async fn pause(&self, service: Service) -> Result<(), ActivationError> {
        self.with_state(|s| s.running.remove(&service));
        self.record(ActivationCall::Pause(service));
        Ok(())
    }

    async fn is_running(&self, service: Service) -> Result<bool, ActivationError> {
        Ok(self.running(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::new();
        config.insert("cluster_name", json!("hpc"));
        config
    }

    #[tokio::test]
    async fn test_mock_render_tracks_changes() {
        let activator = MockActivator::new();
        assert!(activator.render(&config()).await.unwrap());
        assert!(!activator.render(&config()).await.unwrap());
        assert_eq!(activator.rendered().unwrap()["cluster_name"], json!("hpc"));
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let activator = MockActivator::failing();
        assert!(matches!(
            activator.render(&config()).await,
            Err(ActivationError::Mock)
        ));
    }

    #[tokio::test]
    async fn test_mock_services() {
        let activator = MockActivator::new();
        activator.start(Service::Slurmctld).await.unwrap();
        assert!(activator.is_running(Service::Slurmctld).await.unwrap());
        activator.pause(Service::Slurmctld).await.unwrap();
        assert!(!activator.is_running(Service::Slurmctld).await.unwrap());
        assert_eq!(
            activator.calls(),
            vec![
                ActivationCall::Start(Service::Slurmctld),
                ActivationCall::Pause(Service::Slurmctld),
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_service_failure() {
        let activator = MockActivator::new();
        activator.fail_service(Service::Munge);

        assert!(matches!(
            activator.restart(Service::Munge).await,
            Err(ActivationError::Service { service: Service::Munge, .. })
        ));
        assert!(!activator.running(Service::Munge));

        activator.recover_service(Service::Munge);
        activator.restart(Service::Munge).await.unwrap();
        assert!(activator.running(Service::Munge));
    }

    #[tokio::test]
    async fn test_systemd_activator_writes_files() {
        let dir = tempdir().unwrap();
        let activator = SystemdActivator::new(
            dir.path().join("slurm").join("context.json"),
            dir.path().join("munge").join("munge.key"),
        );

        assert!(activator.render(&config()).await.unwrap());
        assert!(!activator.render(&config()).await.unwrap());
        assert!(activator.write_secret("abc").await.unwrap());
        assert!(!activator.write_secret("abc").await.unwrap());

        let save = dir.path().join("spool").join("slurmctld");
        activator.create_state_save_location(&save).await.unwrap();
        assert!(save.is_dir());
    }
}
