//! Configuration types
//!
//! YAML configuration of the filter, the decoder, the table joiner and the
//! CAN interface. Everything is validated once at load time and is immutable
//! afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_yaml::Value;

use crate::types::{BmsError, FieldMap, Result, SignalValue};

/// Read a configuration file into a string
pub fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        BmsError::ConfigError(format!(
            "Could not read configuration file {:?}: {}",
            path, e
        ))
    })
}

fn from_yaml<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_yaml::from_str(text)
        .map_err(|e| BmsError::ConfigError(format!("Invalid {} configuration: {}", what, e)))
}

/// Largest number of ids one `A-B` entry may expand to
pub const MAX_RANGE_IDS: u32 = 0x10000;

/// Expand an id allow-list into frame ids
///
/// Entries are hex strings without `0x`; `A-B` is an inclusive range.
/// Order of first appearance is kept and duplicates are removed. A single
/// range may cover at most [`MAX_RANGE_IDS`] ids.
pub fn extend_ids<S: AsRef<str>>(entries: &[S]) -> Result<Vec<u32>> {
    fn parse_hex(text: &str) -> Result<u32> {
        let text = text.trim();
        if text.is_empty() || !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BmsError::ConfigError(
                "'ids' are not defined as hexadecimal values!".to_string(),
            ));
        }
        u32::from_str_radix(text, 16).map_err(|_| {
            BmsError::ConfigError("'ids' are not defined as hexadecimal values!".to_string())
        })
    }

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.as_ref();
        let (start, end) = match entry.split_once('-') {
            Some((start, end)) => (parse_hex(start)?, parse_hex(end)?),
            None => {
                let id = parse_hex(entry)?;
                (id, id)
            }
        };
        if start > end {
            return Err(BmsError::ConfigError(format!(
                "Invalid id range '{}': start is larger than end.",
                entry
            )));
        }
        if end - start >= MAX_RANGE_IDS {
            return Err(BmsError::ConfigError(format!(
                "Invalid id range '{}': more than {} ids.",
                entry, MAX_RANGE_IDS
            )));
        }
        for id in start..=end {
            if seen.insert(id) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

/// Frame filter configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Column of the id token in a trace line
    pub id_pos: usize,
    /// Allow-list after range expansion, in configuration order
    pub ids: Vec<u32>,
    /// Down-sampling period per id
    pub sampling: HashMap<u32, u32>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    /// Parse and validate a filter configuration
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let root: Value = from_yaml(text, "filter")?;
        if !root.is_mapping() {
            return Err(BmsError::ConfigError(
                "The filter configuration file is not a mapping.".to_string(),
            ));
        }

        let id_pos = root
            .get("id_pos")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                BmsError::ConfigError(
                    "'id_pos' in the configuration file is not an integer.".to_string(),
                )
            })? as usize;

        let raw_ids = root.get("ids").and_then(Value::as_sequence).ok_or_else(|| {
            BmsError::ConfigError("'ids' are not defined in the configuration file.".to_string())
        })?;
        let id_strings = raw_ids
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                BmsError::ConfigError("Not all ids are defined as string. Missing quotes ?".to_string())
            })?;
        let ids = extend_ids(&id_strings)?;

        let mut sampling = HashMap::new();
        if let Some(raw_sampling) = root.get("sampling").filter(|v| !v.is_null()) {
            let mapping = raw_sampling.as_mapping().ok_or_else(|| {
                BmsError::ConfigError("'sampling' is not a mapping of id to period.".to_string())
            })?;
            for (key, period) in mapping {
                let key = key.as_str().ok_or_else(|| {
                    BmsError::ConfigError(
                        "Not all ids are defined as string. Missing quotes ?".to_string(),
                    )
                })?;
                let id = extend_ids(&[key])?[0];
                let period = period
                    .as_u64()
                    .filter(|p| *p > 0 && *p <= u64::from(u32::MAX))
                    .ok_or_else(|| {
                        BmsError::ConfigError(format!(
                            "Sampling period of id '{}' is not a positive integer.",
                            key
                        ))
                    })?;
                sampling.insert(id, period as u32);
            }
            if !sampling.keys().all(|id| ids.contains(id)) {
                return Err(BmsError::ConfigError(
                    "Defined sampling is not a subset of the ids.".to_string(),
                ));
            }
        }

        let path_of = |key: &str| -> Result<Option<PathBuf>> {
            match root.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => value
                    .as_str()
                    .map(|s| Some(PathBuf::from(s)))
                    .ok_or_else(|| {
                        BmsError::ConfigError(format!("'{}' in the configuration file is not a path.", key))
                    }),
            }
        };

        Ok(Self {
            id_pos,
            ids,
            sampling,
            input: path_of("input")?,
            output: path_of("output")?,
        })
    }
}

/// Frame decoder configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecoderConfig {
    /// DBC file describing the frames
    pub dbc: PathBuf,
    pub timestamp_pos: usize,
    pub id_pos: usize,
    pub data_pos: usize,
    /// Directory receiving one file per message; stdout if absent
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Trace to decode; stdin if absent
    #[serde(default)]
    pub input: Option<PathBuf>,
}

impl DecoderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        from_yaml(text, "decoder")
    }

    /// Builder method: override the output directory
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        if output.is_some() {
            self.output = output;
        }
        self
    }
}

/// Output format of the table joiner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }

    /// Format implied by a file extension, if any
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(OutputFormat::Csv),
            "parquet" => Some(OutputFormat::Parquet),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTableConfig {
    start_date: String,
    #[serde(default)]
    output_format: OutputFormat,
    #[serde(default)]
    join_on: Option<String>,
    #[serde(default = "default_tolerance")]
    tolerance: i64,
    #[serde(default = "default_timestamp_factor")]
    timestamp_factor: i64,
}

fn default_tolerance() -> i64 {
    -100_000
}

fn default_timestamp_factor() -> i64 {
    1_000_000
}

/// Table joiner configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    /// Wall-clock date of timestamp 0
    pub start_date: NaiveDateTime,
    pub output_format: OutputFormat,
    /// Anchor column for the as-of join
    pub join_on: Option<String>,
    /// Join tolerance in µs; the sign is ignored
    pub tolerance: i64,
    /// Microseconds per timestamp unit
    pub timestamp_factor: i64,
}

impl TableConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawTableConfig = from_yaml(text, "table")?;
        let start_date = NaiveDateTime::parse_from_str(&raw.start_date, "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| {
                BmsError::ConfigError(format!(
                    "'start_date' {} is not formatted as YYYY-MM-DDTHH:MM:SS.",
                    raw.start_date
                ))
            })?;
        if raw.timestamp_factor <= 0 {
            return Err(BmsError::ConfigError(
                "'timestamp_factor' must be a positive integer.".to_string(),
            ));
        }
        Ok(Self {
            start_date,
            output_format: raw.output_format,
            join_on: raw.join_on,
            tolerance: raw.tolerance,
            timestamp_factor: raw.timestamp_factor,
        })
    }
}

/// Supported CAN interface families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Pcan,
    Kvaser,
    Virtual,
}

impl FromStr for Interface {
    type Err = BmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pcan" => Ok(Interface::Pcan),
            "kvaser" => Ok(Interface::Kvaser),
            "virtual" => Ok(Interface::Virtual),
            _ => Err(BmsError::UnsupportedInterface(s.to_string())),
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Pcan => write!(f, "pcan"),
            Interface::Kvaser => write!(f, "kvaser"),
            Interface::Virtual => write!(f, "virtual"),
        }
    }
}

/// CAN interface selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub interface: Interface,
    pub channel: String,
    pub bitrate: u32,
}

impl BusConfig {
    /// Validate an interface/channel/bitrate triple
    pub fn new(interface: &str, channel: &str, bitrate: u32) -> Result<Self> {
        let interface = Interface::from_str(interface)?;
        match interface {
            Interface::Pcan if !channel.starts_with("PCAN") => {
                return Err(BmsError::ConfigError(format!(
                    "Channel '{}' is not a PCAN channel (expected e.g. 'PCAN_USBBUS1').",
                    channel
                )));
            }
            Interface::Kvaser if channel.parse::<u32>().is_err() => {
                return Err(BmsError::ConfigError(format!(
                    "Channel '{}' is not a Kvaser channel number.",
                    channel
                )));
            }
            _ => {}
        }
        if bitrate == 0 {
            return Err(BmsError::ConfigError("Bitrate must be positive.".to_string()));
        }
        Ok(Self {
            interface,
            channel: channel.to_string(),
            bitrate,
        })
    }

    /// Channel value from YAML, which may be a string or a number
    pub fn channel_from_yaml(value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(BmsError::ConfigError(
                "'channel' is neither a string nor an integer.".to_string(),
            )),
        }
    }
}

/// Rolling raw log configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogConfig {
    pub directory: PathBuf,
    pub base_name: String,
    /// Size at which the active file is rolled over
    pub max_bytes: u64,
    /// Rotated files to keep; 0 keeps all
    pub backup_count: usize,
}

impl RawLogConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            base_name: "foxbms.asc".to_string(),
            max_bytes: 50_000,
            backup_count: 0,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_backup_count(mut self, backup_count: usize) -> Self {
        self.backup_count = backup_count;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.base_name)
    }
}

/// Signal value given in YAML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Label(String),
}

impl From<&FieldValue> for SignalValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(v) => SignalValue::Integer(*v),
            FieldValue::Float(v) => SignalValue::Float(*v),
            FieldValue::Label(v) => SignalValue::Label(v.clone()),
        }
    }
}

/// Periodic request sent while the shell is connected
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateRequestConfig {
    /// DBC message name
    pub message: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl StateRequestConfig {
    pub fn field_map(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        for (name, value) in &self.fields {
            fields.insert(name.clone(), SignalValue::from(value));
        }
        fields
    }
}

fn default_enabled() -> bool {
    true
}

fn default_log_size() -> u64 {
    50_000
}

fn default_subscription_timeout() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
struct RawShellConfig {
    dbc: PathBuf,
    interface: String,
    channel: Value,
    bitrate: u32,
    #[serde(default)]
    log_dir: Option<PathBuf>,
    #[serde(default = "default_log_size")]
    log_size: u64,
    #[serde(default)]
    log_backups: usize,
    #[serde(default)]
    state_request: Option<StateRequestConfig>,
    #[serde(default = "default_subscription_timeout")]
    subscription_timeout_ms: u64,
    #[serde(default)]
    stream: Option<PathBuf>,
}

/// Request shell configuration (`bms.yml`)
#[derive(Debug, Clone, PartialEq)]
pub struct ShellConfig {
    pub dbc: PathBuf,
    pub bus: BusConfig,
    pub raw_log: Option<RawLogConfig>,
    pub state_request: Option<StateRequestConfig>,
    /// Zero disables the timeout
    pub subscription_timeout: Duration,
    /// File receiving every decoded inbound frame
    pub stream: Option<PathBuf>,
}

impl ShellConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&read_config_file(path)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawShellConfig = from_yaml(text, "shell")?;
        let channel = BusConfig::channel_from_yaml(&raw.channel)?;
        let bus = BusConfig::new(&raw.interface, &channel, raw.bitrate)?;
        let raw_log = raw.log_dir.map(|dir| {
            RawLogConfig::new(dir)
                .with_max_bytes(raw.log_size)
                .with_backup_count(raw.log_backups)
        });
        Ok(Self {
            dbc: raw.dbc,
            bus,
            raw_log,
            state_request: raw.state_request.filter(|r| r.enabled),
            subscription_timeout: Duration::from_millis(raw.subscription_timeout_ms),
            stream: raw.stream,
        })
    }
}
