//! Core types for the BMS CAN toolchain
//!
//! This module defines the frame type that flows between the bus adapters,
//! the worker and the shell, the decoded value types produced by the codec,
//! and the error type shared by every component.

use std::fmt;
use std::path::Path;

/// Result type for toolchain operations
pub type Result<T> = std::result::Result<T, BmsError>;

/// Largest payload of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// A single CAN frame as seen on the bus
///
/// Produced by the adapters (received frames) or by the encoder (frames to
/// transmit). The timestamp is in seconds; for received frames it is the
/// adapter's receive time, for encoded frames it is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub arbitration_id: u32,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
    /// Timestamp in seconds
    pub timestamp: f64,
    /// True if the frame was received, false if it was transmitted
    pub is_rx: bool,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl RawFrame {
    /// Create a frame to be transmitted (timestamp 0, standard id unless it does not fit)
    pub fn new(arbitration_id: u32, data: Vec<u8>) -> Self {
        Self {
            arbitration_id,
            data,
            timestamp: 0.0,
            is_rx: false,
            is_extended: arbitration_id > 0x7FF,
        }
    }

    /// Create a received frame
    pub fn received(arbitration_id: u32, data: Vec<u8>, timestamp: f64) -> Self {
        Self {
            arbitration_id,
            data,
            timestamp,
            is_rx: true,
            is_extended: arbitration_id > 0x7FF,
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// Payload rendered as space separated uppercase hex bytes
    pub fn data_hex(&self) -> String {
        self.data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Errors produced by the toolchain
#[derive(Debug, thiserror::Error)]
pub enum BmsError {
    #[error("{0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    EncodeError(String),

    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    #[error("Could not initialize CAN bus. {0}")]
    AdapterInitError(String),

    #[error("CAN bus operation failed: {0}")]
    AdapterOpError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unsupported CAN interface '{0}'.")]
    UnsupportedInterface(String),
}

impl BmsError {
    /// Wrap an IO error with the path it happened on
    pub fn io_at(path: &Path, err: std::io::Error) -> Self {
        BmsError::IoError(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.display(), err),
        ))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BmsError::UnsupportedInterface(_) | BmsError::Timeout(_) => 2,
            _ => 1,
        }
    }
}

/// Signal value types produced and accepted by the codec
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    /// Integer value (raw value with integral scaling)
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Enum label from the signal's value table
    Label(String),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{}", v),
            SignalValue::Label(v) => write!(f, "{}", v),
        }
    }
}

impl SignalValue {
    /// Numeric view of the value, `None` for labels
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Integer(v) => Some(*v as f64),
            SignalValue::Float(v) => Some(*v),
            SignalValue::Label(_) => None,
        }
    }

    /// True if the value is an enum label
    pub fn is_label(&self) -> bool {
        matches!(self, SignalValue::Label(_))
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Integer(v)
    }
}

impl From<i32> for SignalValue {
    fn from(v: i32) -> Self {
        SignalValue::Integer(i64::from(v))
    }
}

impl From<u32> for SignalValue {
    fn from(v: u32) -> Self {
        SignalValue::Integer(i64::from(v))
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Float(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        SignalValue::Label(v.to_string())
    }
}

/// Mapping from signal name to value, in insertion order
///
/// Signal names are unique; inserting an existing name replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, SignalValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SignalValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder form of [`FieldMap::insert`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SignalValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<SignalValue> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SignalValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl fmt::Display for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                SignalValue::Label(label) => write!(f, "'{}': '{}'", name, label)?,
                other => write!(f, "'{}': {}", name, other)?,
            }
        }
        write!(f, "}}")
    }
}
