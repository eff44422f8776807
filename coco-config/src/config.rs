use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coco_log::LogConfig;
use serde::{Deserialize, Serialize};

/// The largest datagram collectd 5 emits by default.
///
/// See <https://collectd.org/wiki/index.php/Binary_protocol>.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1452;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a single field of the configuration.
    Field(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: impl Into<String>) -> Self {
        self.source = ConfigErrorSource::Field(name.into());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
    /// The configuration does not declare a single tier.
    #[error("no tiers configured")]
    NoTiers,
}

/// Controls the inbound collectd listener.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Listen {
    /// The UDP address to receive collectd packets on.
    pub bind: SocketAddr,
    /// Path to the collectd `types.db` file used to validate values.
    pub typesdb: PathBuf,
    /// Size of the receive buffer for a single datagram.
    pub max_datagram_size: usize,
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 25826)),
            typesdb: PathBuf::from("/usr/share/collectd/types.db"),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

/// Controls the blacklist filter stage.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Filter {
    /// Regular expression matched against `host/plugin/instance/type/instance`.
    ///
    /// Matching packets are dropped. Without a blacklist, all packets are forwarded.
    pub blacklist: Option<String>,
    /// Number of concurrent filter workers.
    pub workers: usize,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            blacklist: None,
            workers: 4,
        }
    }
}

/// A named routing domain.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TierConfig {
    /// Backend addresses (`host:port`) that the tier shards packets across.
    ///
    /// The position of a target in this list determines its identity in the hash ring. Appending
    /// targets keeps existing assignments stable, reordering them does not.
    pub targets: Vec<String>,
}

/// Controls the introspection HTTP API.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Api {
    /// The TCP address of the HTTP server.
    pub bind: SocketAddr,
    /// Upper bound for reading a request and writing its response.
    pub timeout_secs: u64,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 9090)),
            timeout_secs: 5,
        }
    }
}

/// Controls periodic measurements of queues and accounting.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Measure {
    /// Interval between two samples of queue depths and tier ratios.
    pub interval_secs: u64,
}

impl Default for Measure {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

/// Behavior of an inter-stage queue that reached its capacity.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// The producer waits until there is room in the queue.
    #[default]
    Block,
    /// The item is dropped and counted.
    Drop,
}

/// Controls the bounded queues between listener, filter and router.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Queues {
    /// Maximum number of packets buffered in each queue.
    pub capacity: usize,
    /// What happens when a queue is full.
    pub policy: QueuePolicy,
}

impl Default for Queues {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            policy: QueuePolicy::Block,
        }
    }
}

/// Controls delivery to backend targets.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Forward {
    /// Optional timeout for a single datagram write to a target, in milliseconds.
    pub write_timeout_ms: Option<u64>,
}

/// Controls the per-target accounting maps.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Accounting {
    /// Entries not refreshed for this many seconds are evicted on each measurement tick.
    ///
    /// Without this setting, accounting entries are kept for the lifetime of the process.
    pub max_age_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct ConfigValues {
    #[serde(default)]
    listen: Listen,
    #[serde(default)]
    filter: Filter,
    #[serde(default)]
    tiers: BTreeMap<String, TierConfig>,
    #[serde(default)]
    api: Api,
    #[serde(default)]
    measure: Measure,
    #[serde(default)]
    queues: Queues,
    #[serde(default, rename = "send")]
    forward: Forward,
    #[serde(default)]
    accounting: Accounting,
    #[serde(default)]
    logging: LogConfig,
}

impl ConfigValues {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::NoTiers));
        }

        let invalid = |field: &str| ConfigError::new(ConfigErrorKind::InvalidValue).field(field);

        if self.filter.workers == 0 {
            return Err(invalid("filter.workers"));
        }
        if self.queues.capacity == 0 {
            return Err(invalid("queues.capacity"));
        }
        if self.measure.interval_secs == 0 {
            return Err(invalid("measure.interval_secs"));
        }
        if self.listen.max_datagram_size == 0 || self.listen.max_datagram_size > usize::from(u16::MAX)
        {
            return Err(invalid("listen.max_datagram_size"));
        }
        if self.forward.write_timeout_ms == Some(0) {
            return Err(invalid("send.write_timeout_ms"));
        }
        if let Some(max_age) = self.accounting.max_age_secs {
            if max_age == 0 || i64::try_from(max_age).is_err() {
                return Err(invalid("accounting.max_age_secs"));
            }
        }

        Ok(())
    }
}

/// Config struct.
#[derive(Clone)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from the given YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();

        let f = fs::File::open(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        let values: ConfigValues = serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path))?;

        values.validate().map_err(|e| match e.source {
            ConfigErrorSource::None => e.file(path),
            _ => e,
        })?;

        Ok(Config {
            values,
            path: path.to_path_buf(),
        })
    }

    /// Creates a config from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadJson))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Serializes the effective configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// The path of the file this config was loaded from, empty if not loaded from a file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the UDP address the collectd listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.values.listen.bind
    }

    /// Returns the path of the collectd `types.db` file.
    pub fn types_db_path(&self) -> &Path {
        &self.values.listen.typesdb
    }

    /// Returns the size of the datagram receive buffer.
    pub fn max_datagram_size(&self) -> usize {
        self.values.listen.max_datagram_size
    }

    /// Returns the blacklist pattern, if configured.
    pub fn blacklist(&self) -> Option<&str> {
        self.values.filter.blacklist.as_deref()
    }

    /// Returns the number of concurrent filter workers.
    pub fn filter_workers(&self) -> usize {
        self.values.filter.workers
    }

    /// Returns all configured tiers ordered by name.
    pub fn tiers(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.values
            .tiers
            .iter()
            .map(|(name, tier)| (name.as_str(), tier.targets.as_slice()))
    }

    /// Returns the TCP address of the introspection API.
    pub fn api_addr(&self) -> SocketAddr {
        self.values.api.bind
    }

    /// Returns the per-request timeout of the introspection API.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.values.api.timeout_secs)
    }

    /// Returns the interval of queue and ratio measurements.
    pub fn measure_interval(&self) -> Duration {
        Duration::from_secs(self.values.measure.interval_secs)
    }

    /// Returns the capacity of each inter-stage queue.
    pub fn queue_capacity(&self) -> usize {
        self.values.queues.capacity
    }

    /// Returns the behavior of full queues.
    pub fn queue_policy(&self) -> QueuePolicy {
        self.values.queues.policy
    }

    /// Returns the optional write timeout for backend targets.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.values.forward.write_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the age after which accounting entries are evicted.
    pub fn accounting_max_age(&self) -> Option<Duration> {
        self.values.accounting.max_age_secs.map(Duration::from_secs)
    }
}
