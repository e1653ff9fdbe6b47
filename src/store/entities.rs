//! The rows of the control-plane model. These are plain records; all
//! ownership and cross-references live in the [`Store`](super::Store) as
//! integer keys.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable handle supplied by the store for every row
pub type Key = u64;

/// The port getEccSoapServer listens on unless configured otherwise
pub const DEFAULT_ECC_PORT: u16 = 8083;
/// The port dataRouter listens on unless configured otherwise
pub const DEFAULT_ROUTER_PORT: u16 = 46005;

const IDLE_NAME: &str = "Idle";
const DESCRIBED_NAME: &str = "Described";
const PREPARED_NAME: &str = "Prepared";
const READY_NAME: &str = "Ready";
const RUNNING_NAME: &str = "Running";

/// The state of an getEccSoapServer state machine as reported over the wire.
/// The integer values are the wire contract, do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EccState {
    Idle = 1,
    Described = 2,
    Prepared = 3,
    Ready = 4,
    Running = 5,
}

impl std::fmt::Display for EccState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "{IDLE_NAME}"),
            Self::Described => write!(f, "{DESCRIBED_NAME}"),
            Self::Prepared => write!(f, "{PREPARED_NAME}"),
            Self::Ready => write!(f, "{READY_NAME}"),
            Self::Running => write!(f, "{RUNNING_NAME}"),
        }
    }
}

impl From<EccState> for i32 {
    fn from(value: EccState) -> i32 {
        match value {
            EccState::Idle => 1,
            EccState::Described => 2,
            EccState::Prepared => 3,
            EccState::Ready => 4,
            EccState::Running => 5,
        }
    }
}

impl TryFrom<i32> for EccState {
    type Error = BadStateValue;
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EccState::Idle),
            2 => Ok(EccState::Described),
            3 => Ok(EccState::Prepared),
            4 => Ok(EccState::Ready),
            5 => Ok(EccState::Running),
            _ => Err(BadStateValue(value)),
        }
    }
}

impl EccState {
    /// The state one step closer to Idle, saturating at Idle. Used when
    /// resolving the fleet-wide reset pseudo-target.
    pub fn step_back(&self) -> EccState {
        match self {
            Self::Idle | Self::Described => Self::Idle,
            Self::Prepared => Self::Described,
            Self::Ready => Self::Prepared,
            Self::Running => Self::Ready,
        }
    }
}

/// An integer from the wire that is not a state machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadStateValue(pub i32);

impl std::fmt::Display for BadStateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not an ECC state machine state", self.0)
    }
}

impl std::error::Error for BadStateValue {}

/// The stream type a dataRouter was started with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    Ice,
    Zbuf,
    #[default]
    Tcp,
    Fdt,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ice => write!(f, "ICE"),
            Self::Zbuf => write!(f, "ZBUF"),
            Self::Tcp => write!(f, "TCP"),
            Self::Fdt => write!(f, "FDT"),
        }
    }
}

/// An experiment groups one farm of ECC servers and routers with its
/// run history. Run numbering is per experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub key: Key,
    pub name: String,
    /// Expected duration of a run in seconds
    pub target_run_duration: u32,
    /// The operator account this experiment belongs to
    pub user: String,
}

impl Experiment {
    pub fn new(name: &str, user: &str) -> Self {
        Self {
            key: 0,
            name: name.to_string(),
            target_run_duration: 3600,
            user: user.to_string(),
        }
    }
}

/// One remote getEccSoapServer endpoint and our last known view of its
/// state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EccServer {
    pub key: Key,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    /// The config set transitions will be performed with; keys into the
    /// ConfigId table
    pub selected_config: Option<Key>,
    /// Where getEccSoapServer writes its log on the remote machine
    pub log_path: String,
    pub state: EccState,
    /// Set when a change-state task is submitted, cleared by the next
    /// refresh that sees a quiescent remote
    pub is_transitioning: bool,
    pub is_online: bool,
    pub experiment: Key,
}

impl EccServer {
    pub fn new(name: &str, ip_address: &str, experiment: Key) -> Self {
        Self {
            key: 0,
            name: name.to_string(),
            ip_address: ip_address.to_string(),
            port: DEFAULT_ECC_PORT,
            selected_config: None,
            log_path: String::from("~/Library/Logs/getEccSoapServer.log"),
            state: EccState::Idle,
            is_transitioning: false,
            is_online: false,
            experiment,
        }
    }

    /// The URL SOAP requests for this server are POSTed to
    pub fn ecc_url(&self) -> String {
        format!("http://{}:{}/", self.ip_address, self.port)
    }
}

/// One remote dataRouter process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRouter {
    pub key: Key,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub log_path: String,
    pub is_online: bool,
    /// True iff no leftover .graw files sit in the router's working
    /// directory; checked before a run may start
    pub staging_directory_is_clean: bool,
    pub experiment: Key,
}

impl DataRouter {
    pub fn new(name: &str, ip_address: &str, experiment: Key) -> Self {
        Self {
            key: 0,
            name: name.to_string(),
            ip_address: ip_address.to_string(),
            port: DEFAULT_ROUTER_PORT,
            connection_type: ConnectionType::Tcp,
            log_path: String::from("~/Library/Logs/dataRouter.log"),
            is_online: false,
            staging_directory_is_clean: true,
            experiment,
        }
    }
}

/// A logical data source: the pairing of a sender (CoBo or MuTAnT) with
/// the router receiving its stream. The name must match the entry in the
/// config files, e.g. "CoBo[0]" or "Mutant[master]".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub key: Key,
    pub name: String,
    pub ecc_server: Option<Key>,
    pub data_router: Option<Key>,
}

impl DataSource {
    pub fn new(name: &str, ecc_server: Option<Key>, data_router: Option<Key>) -> Self {
        Self {
            key: 0,
            name: name.to_string(),
            ecc_server,
            data_router,
        }
    }
}

/// One configuration file set as known to a getEccSoapServer. The actual
/// filenames on the remote side are e.g. describe-[name].xcfg; the server
/// adds the prefix and extension itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigId {
    pub key: Key,
    pub describe: String,
    pub prepare: String,
    pub configure: String,
    pub ecc_server: Key,
    /// When this set was last seen in a GetConfigIDs reply; older rows are
    /// swept after each refresh
    pub last_fetched: DateTime<Utc>,
}

impl ConfigId {
    pub fn new(describe: &str, prepare: &str, configure: &str, ecc_server: Key) -> Self {
        Self {
            key: 0,
            describe: describe.to_string(),
            prepare: prepare.to_string(),
            configure: configure.to_string(),
            ecc_server,
            last_fetched: Utc::now(),
        }
    }

    /// The name triple, used for equality within one ECC server
    pub fn triple(&self) -> (&str, &str, &str) {
        (&self.describe, &self.prepare, &self.configure)
    }
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.describe, self.prepare, self.configure)
    }
}

/// How a run should be treated downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunClass {
    Production,
    Testing,
    Junk,
}

impl std::fmt::Display for RunClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "Production"),
            Self::Testing => write!(f, "Testing"),
            Self::Junk => write!(f, "Junk"),
        }
    }
}

/// The metadata of one acquisition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub key: Key,
    pub experiment: Key,
    pub run_number: i32,
    pub start_datetime: DateTime<Utc>,
    /// None while the run is being recorded
    pub stop_datetime: Option<DateTime<Utc>>,
    pub title: String,
    /// Snapshot of the config names in use when the run started
    pub config_name: String,
    pub run_class: RunClass,
}

impl RunMetadata {
    /// Duration of the run, taken against the current time if the run has
    /// not stopped yet
    pub fn duration(&self) -> chrono::Duration {
        match self.stop_datetime {
            Some(stop) => stop - self.start_datetime,
            None => Utc::now() - self.start_datetime,
        }
    }

    /// The duration as HH:MM:SS for display
    pub fn duration_string(&self) -> String {
        let total = self.duration().num_seconds().max(0);
        let (hours, rem) = (total / 3600, total % 3600);
        let (minutes, seconds) = (rem / 60, rem % 60);
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// The value type of an observable column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Float,
    Text,
}

/// A typed column the operators fill in per run (gas pressure, beam
/// energy, and so on)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    pub key: Key,
    pub experiment: Key,
    pub name: String,
    pub value_type: ValueType,
    pub units: String,
    pub comment: String,
    /// Display order on the run sheet
    pub ordinal: i32,
}

/// The value of one Observable on one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub key: Key,
    pub observable: Key,
    pub run: Key,
    pub value: MeasurementValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasurementValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}
