//! CAN database
//!
//! Immutable lookup of message definitions by name and by frame id. Built
//! once from a DBC file and shared read-only (wrap it in an `Arc`).

use std::collections::HashMap;
use std::path::Path;

use crate::types::{BmsError, Result};

/// A complete CAN message definition
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    /// CAN message ID
    pub id: u32,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message, in DBC order
    pub signals: Vec<SignalDefinition>,
}

impl MessageDefinition {
    /// The multiplexer selector signal, if the message has one
    pub fn selector(&self) -> Option<&SignalDefinition> {
        self.signals
            .iter()
            .find(|s| s.multiplex == MultiplexRole::Selector)
    }

    /// True if this message has a selector signal
    pub fn is_multiplexed(&self) -> bool {
        self.selector().is_some()
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Signals present for the given selector value (the selector included)
    pub fn signals_for(&self, selector_value: Option<u64>) -> impl Iterator<Item = &SignalDefinition> {
        self.signals.iter().filter(move |s| match s.multiplex {
            MultiplexRole::None | MultiplexRole::Selector => true,
            MultiplexRole::Selected(v) => Some(v) == selector_value,
        })
    }

    /// True if at least one signal is selected by `value`
    pub fn has_group(&self, value: u64) -> bool {
        self.signals
            .iter()
            .any(|s| s.multiplex == MultiplexRole::Selected(value))
    }
}

/// A CAN signal definition
#[derive(Debug, Clone)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit as written in the DBC (LSB for Intel, MSB for Motorola)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "mA", "V")
    pub unit: Option<String>,
    /// Enum choices (raw value -> label)
    pub choices: Option<Vec<(i64, String)>>,
    pub multiplex: MultiplexRole,
}

impl SignalDefinition {
    /// Label for a raw value, if the signal has choices
    pub fn choice_label(&self, raw: i64) -> Option<&str> {
        self.choices
            .as_ref()?
            .iter()
            .find(|(v, _)| *v == raw)
            .map(|(_, label)| label.as_str())
    }

    /// Raw value for a label, if the signal has choices
    pub fn choice_value(&self, label: &str) -> Option<i64> {
        self.choices
            .as_ref()?
            .iter()
            .find(|(_, l)| l == label)
            .map(|(v, _)| *v)
    }

    /// True when the DBC declares a usable physical range
    pub fn has_range(&self) -> bool {
        self.min != self.max
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// Role of a signal in a multiplexed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexRole {
    /// Always present
    None,
    /// Its value selects which group of signals is present
    Selector,
    /// Present only when the selector has this value
    Selected(u64),
}

/// The CAN database
#[derive(Debug, Default)]
pub struct DbcDatabase {
    /// All message definitions, in file order
    messages: Vec<MessageDefinition>,
    /// Key: CAN ID, Value: index into `messages`
    by_id: HashMap<u32, usize>,
    /// Key: message name, Value: index into `messages`
    by_name: HashMap<String, usize>,
}

impl DbcDatabase {
    /// Load a DBC file
    ///
    /// Fails with `ConfigError` if the file is absent, unreadable or not a DBC.
    pub fn load(path: &Path) -> Result<Self> {
        let messages = crate::signals::dbc::parse_dbc_file(path)?;
        Ok(Self::from_messages(messages))
    }

    /// Build a database from DBC text
    pub fn from_dbc_str(content: &str) -> Result<Self> {
        let messages = crate::signals::dbc::parse_dbc_str(content, "<memory>")?;
        Ok(Self::from_messages(messages))
    }

    /// Build a database from already parsed definitions
    pub fn from_messages(messages: Vec<MessageDefinition>) -> Self {
        let mut db = Self::default();
        for message in messages {
            db.add_message(message);
        }
        db
    }

    fn add_message(&mut self, message: MessageDefinition) {
        let idx = self.messages.len();
        if self.by_id.insert(message.id, idx).is_some() {
            log::warn!("Duplicate definition for CAN ID 0x{:X}, keeping the last one", message.id);
        }
        self.by_name.insert(message.name.clone(), idx);
        self.messages.push(message);
    }

    /// Get a message definition by frame id
    pub fn get_message(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.by_id.get(&can_id).map(|&idx| &self.messages[idx])
    }

    /// Get a message definition by name
    pub fn get_message_by_name(&self, name: &str) -> Option<&MessageDefinition> {
        self.by_name.get(name).map(|&idx| &self.messages[idx])
    }

    pub fn messages(&self) -> &[MessageDefinition] {
        &self.messages
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
            num_multiplexed: self.messages.iter().filter(|m| m.is_multiplexed()).count(),
        }
    }

    /// Resolve a message definition or fail with a lookup error
    pub(crate) fn require_by_name(&self, name: &str) -> Result<&MessageDefinition> {
        self.get_message_by_name(name)
            .ok_or_else(|| BmsError::EncodeError(format!("Unknown message '{}'", name)))
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Messages with a multiplexer selector
    pub num_multiplexed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(name: &str, multiplex: MultiplexRole) -> SignalDefinition {
        SignalDefinition {
            name: name.to_string(),
            start_bit: 0,
            length: 8,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            choices: None,
            multiplex,
        }
    }

    #[test]
    fn test_empty_database() {
        let db = DbcDatabase::default();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 0);
        assert_eq!(stats.num_signals, 0);
        assert!(db.get_message(0x123).is_none());
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let message = MessageDefinition {
            id: 0x300,
            name: "f_Debug".to_string(),
            size: 8,
            sender: None,
            signals: vec![
                signal("Mux", MultiplexRole::Selector),
                signal("A", MultiplexRole::Selected(0)),
                signal("B", MultiplexRole::Selected(1)),
            ],
        };
        let db = DbcDatabase::from_messages(vec![message]);

        assert_eq!(db.get_message(0x300).map(|m| m.name.as_str()), Some("f_Debug"));
        let msg = db.get_message_by_name("f_Debug").unwrap();
        assert!(msg.is_multiplexed());
        assert!(msg.has_group(1));
        assert!(!msg.has_group(2));

        let names: Vec<_> = msg.signals_for(Some(1)).map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Mux", "B"]);
        assert_eq!(db.stats().num_multiplexed, 1);
    }
}
