//! Configuration for the controller agent.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use slurmha_names::UnitName;
use slurmha_reconcile::StaticConfig;

/// Controller agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of this unit.
    pub unit_name: UnitName,

    /// Whether the leader-election primitive told this unit it leads.
    pub is_leader: bool,

    /// Data directory for local state.
    pub data_dir: PathBuf,

    /// Directory the relation transport exchanges data through. Each unit
    /// reads and writes only its own subdirectory (see
    /// [`Config::unit_relation_dir`]), so the directory may be shared.
    pub relation_dir: PathBuf,

    /// Directory holding the leader settings document. Both units of the
    /// pair must see the same directory.
    pub leader_dir: PathBuf,

    /// Operator configuration file (TOML).
    pub static_config_path: PathBuf,

    /// Where the rendered controller context is written.
    pub rendered_config_path: PathBuf,

    /// Where the shared authentication key is written.
    pub munge_key_path: PathBuf,

    /// Use the mock activator instead of systemd.
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let unit_name = std::env::var("SLURMHA_UNIT_NAME")
            .unwrap_or_else(|_| "slurm-controller/0".to_string())
            .parse()
            .context("SLURMHA_UNIT_NAME is not a valid unit name")?;

        let is_leader = env_flag("SLURMHA_IS_LEADER");

        let data_dir = PathBuf::from(
            std::env::var("SLURMHA_DATA_DIR").unwrap_or_else(|_| "/var/lib/slurm-ha".to_string()),
        );

        let relation_dir = std::env::var("SLURMHA_RELATION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("relations"));

        let leader_dir = std::env::var("SLURMHA_LEADER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("leader"));

        let static_config_path = PathBuf::from(
            std::env::var("SLURMHA_STATIC_CONFIG")
                .unwrap_or_else(|_| "/etc/slurm-ha/config.toml".to_string()),
        );

        let rendered_config_path = PathBuf::from(
            std::env::var("SLURMHA_RENDERED_CONFIG")
                .unwrap_or_else(|_| "/etc/slurm/slurm-context.json".to_string()),
        );

        let munge_key_path = PathBuf::from(
            std::env::var("SLURMHA_MUNGE_KEY_PATH")
                .unwrap_or_else(|_| "/etc/munge/munge.key".to_string()),
        );

        let dev_mode = env_flag("SLURMHA_DEV");

        let log_level =
            std::env::var("SLURMHA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            unit_name,
            is_leader,
            data_dir,
            relation_dir,
            leader_dir,
            static_config_path,
            rendered_config_path,
            munge_key_path,
            dev_mode,
            log_level,
        })
    }

    /// This unit's relation snapshot directory.
    pub fn unit_relation_dir(&self) -> PathBuf {
        self.relation_dir.join(self.unit_name.slug())
    }

    /// Path of the local state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Load the operator's static configuration.
///
/// A missing file is an empty configuration.
pub fn load_static_config(path: &Path) -> Result<StaticConfig> {
    if !path.exists() {
        return Ok(StaticConfig::new());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read static config from {:?}", path))?;
    parse_static_config(&contents)
        .with_context(|| format!("Failed to parse static config from {:?}", path))
}

/// Parse TOML operator configuration into a flat JSON map.
pub fn parse_static_config(contents: &str) -> Result<StaticConfig> {
    let table: toml::Table = toml::from_str(contents)?;
    let mut config = StaticConfig::new();
    for (key, value) in table {
        config.insert(key, serde_json::to_value(value)?);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_static_config() {
        let config = parse_static_config(
            r#"
            cluster_name = "hpc"
            node_weight_criteria = "RealMemory"
            default_partition_timelimit = 60
            "#,
        )
        .unwrap();

        assert_eq!(config["cluster_name"], json!("hpc"));
        assert_eq!(config["node_weight_criteria"], json!("RealMemory"));
        assert_eq!(config["default_partition_timelimit"], json!(60));
    }

    #[test]
    fn test_parse_static_config_rejects_garbage() {
        assert!(parse_static_config("cluster_name = ").is_err());
    }

    #[test]
    fn test_missing_static_config_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_static_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn test_units_get_their_own_relation_dir() {
        let config = |unit: &str| Config {
            unit_name: unit.parse().unwrap(),
            is_leader: false,
            data_dir: PathBuf::from("/srv/slurmha"),
            relation_dir: PathBuf::from("/srv/slurmha/relations"),
            leader_dir: PathBuf::from("/srv/slurmha/leader"),
            static_config_path: PathBuf::from("/srv/slurmha/config.toml"),
            rendered_config_path: PathBuf::from("/srv/slurmha/context.json"),
            munge_key_path: PathBuf::from("/srv/slurmha/munge.key"),
            dev_mode: true,
            log_level: "info".to_string(),
        };

        assert_eq!(
            config("slurm-controller/0").unit_relation_dir(),
            PathBuf::from("/srv/slurmha/relations/slurm-controller-0")
        );
        assert_ne!(
            config("slurm-controller/0").unit_relation_dir(),
            config("slurm-controller/1").unit_relation_dir()
        );
    }
}
