//! (De)Serializable daemon configuration. One YAML file describes the
//! experiment, its farm of ECC servers and data routers, and the tuning
//! knobs of the dispatcher and poller, so a control plane can come up
//! without any interactive setup.
use crate::poller::PollerIntervals;
use crate::store::entities::{
    ConnectionType, DataRouter, EccServer, Experiment, Key, DEFAULT_ECC_PORT, DEFAULT_ROUTER_PORT,
};
use crate::store::error::StoreError;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
    /// A data source names an ECC server or router the file does not
    /// define
    UnknownReference(String, String),
    Store(StoreError),
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Parse(value)
    }
}

impl From<StoreError> for ConfigError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Could not read the config file: {e}"),
            Self::Parse(e) => write!(f, "Could not parse the config file: {e}"),
            Self::UnknownReference(source, target) => write!(
                f,
                "Data source {source} references {target}, which the config does not define!"
            ),
            Self::Store(e) => write!(f, "Could not register the fleet: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_ecc_port() -> u16 {
    DEFAULT_ECC_PORT
}

fn default_router_port() -> u16 {
    DEFAULT_ROUTER_PORT
}

fn default_ecc_log() -> String {
    String::from("~/Library/Logs/getEccSoapServer.log")
}

fn default_router_log() -> String {
    String::from("~/Library/Logs/dataRouter.log")
}

fn default_run_duration() -> u32 {
    3600
}

fn default_operator() -> String {
    String::from("daq")
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    64
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EccServerEntry {
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_ecc_port")]
    pub port: u16,
    #[serde(default = "default_ecc_log")]
    pub log_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataRouterEntry {
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_router_port")]
    pub port: u16,
    #[serde(default)]
    pub connection_type: ConnectionType,
    #[serde(default = "default_router_log")]
    pub log_path: String,
}

/// Pairs a sender with its ECC server and router by the names defined
/// above in the same file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSourceEntry {
    pub name: String,
    #[serde(default)]
    pub ecc_server: Option<String>,
    #[serde(default)]
    pub data_router: Option<String>,
}

/// End-of-run config snapshot destination
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupEntry {
    pub source_paths: Vec<String>,
    pub dest_root: String,
}

/// (De)Serializable daemon configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,

    pub experiment: String,
    #[serde(default = "default_run_duration")]
    pub target_run_duration: u32,
    #[serde(default = "default_operator")]
    pub operator: String,

    #[serde(default)]
    pub ecc_servers: Vec<EccServerEntry>,
    #[serde(default)]
    pub data_routers: Vec<DataRouterEntry>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceEntry>,

    #[serde(default)]
    pub intervals: PollerIntervals,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default)]
    pub config_backup: Option<BackupEntry>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&text)?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Put the farm described by this file into the store, replacing
    /// whatever fleet the experiment had, all in one transaction. The
    /// experiment row itself is created on first use.
    pub fn register_fleet(&self, store: &Store) -> Result<Key, ConfigError> {
        let experiment = match store
            .experiments()
            .into_iter()
            .find(|e| e.name == self.experiment)
        {
            Some(existing) => existing.key,
            None => {
                let mut row = Experiment::new(&self.experiment, &self.operator);
                row.target_run_duration = self.target_run_duration;
                store.add_experiment(row)?
            }
        };

        let eccs: Vec<EccServer> = self
            .ecc_servers
            .iter()
            .map(|entry| {
                let mut row = EccServer::new(&entry.name, &entry.ip_address, experiment);
                row.port = entry.port;
                row.log_path = entry.log_path.clone();
                row
            })
            .collect();
        let routers: Vec<DataRouter> = self
            .data_routers
            .iter()
            .map(|entry| {
                let mut row = DataRouter::new(&entry.name, &entry.ip_address, experiment);
                row.port = entry.port;
                row.connection_type = entry.connection_type;
                row.log_path = entry.log_path.clone();
                row
            })
            .collect();

        let mut sources = Vec::with_capacity(self.data_sources.len());
        for entry in &self.data_sources {
            let ecc_idx = match &entry.ecc_server {
                Some(name) => Some(self.ecc_servers.iter().position(|e| &e.name == name).ok_or_else(
                    || ConfigError::UnknownReference(entry.name.clone(), name.clone()),
                )?),
                None => None,
            };
            let router_idx = match &entry.data_router {
                Some(name) => Some(
                    self.data_routers
                        .iter()
                        .position(|r| &r.name == name)
                        .ok_or_else(|| {
                            ConfigError::UnknownReference(entry.name.clone(), name.clone())
                        })?,
                ),
                None => None,
            };
            sources.push((entry.name.clone(), ecc_idx, router_idx));
        }

        store.replace_fleet(experiment, eccs, routers, sources)?;
        Ok(experiment)
    }
}
