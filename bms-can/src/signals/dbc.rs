//! DBC file parser
//!
//! Parses Vector DBC files and converts them into our internal signal database format.

use crate::signals::database::{
    ByteOrder, MessageDefinition, MultiplexRole, SignalDefinition, ValueType,
};
use crate::types::{BmsError, Result};
use std::path::Path;

/// Frame id bit set by DBC files for extended (29-bit) identifiers
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Parsing DBC file: {:?}", path);

    if !path.is_file() {
        return Err(BmsError::ConfigError(format!(
            "DBC file {:?} does not exist.",
            path
        )));
    }

    let bytes = std::fs::read(path).map_err(|e| {
        BmsError::ConfigError(format!("Failed to read DBC file {:?}: {}", path, e))
    })?;

    // Try UTF-8 first, then fall back to Latin-1 (compatible with Windows-1252)
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc");
    let messages = parse_dbc_str(&content, source)?;

    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Ok(messages)
}

/// Parse DBC text
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<MessageDefinition>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        BmsError::ConfigError(format!(
            "{} is not a recognized CAN database: {:?}",
            source, e
        ))
    })?;

    dbc.messages()
        .iter()
        .map(|dbc_msg| convert_message(&dbc, dbc_msg))
        .collect()
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(dbc: &can_dbc::DBC, dbc_msg: &can_dbc::Message) -> Result<MessageDefinition> {
    let has_selector = dbc_msg.signals().iter().any(|s| {
        matches!(
            s.multiplexer_indicator(),
            can_dbc::MultiplexIndicator::Multiplexor
                | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_)
        )
    });

    let signals = dbc_msg
        .signals()
        .iter()
        .map(|dbc_sig| {
            let choices = dbc
                .value_descriptions_for_signal(dbc_msg.message_id().clone(), dbc_sig.name())
                .map(|descriptions| {
                    descriptions
                        .iter()
                        .map(|d| (*d.a() as i64, d.b().to_string()))
                        .collect::<Vec<_>>()
                });
            convert_signal(dbc_sig, has_selector, choices)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(MessageDefinition {
        id: dbc_msg.message_id().0 & !EXTENDED_ID_FLAG,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
    })
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    has_selector: bool,
    choices: Option<Vec<(i64, String)>>,
) -> Result<SignalDefinition> {
    let byte_order = match dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let multiplex = match dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::Multiplexor => MultiplexRole::Selector,
        // Extended multiplexing is flattened: the signal acts as a selector
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_) => MultiplexRole::Selector,
        can_dbc::MultiplexIndicator::MultiplexedSignal(value) => {
            if !has_selector {
                return Err(BmsError::ConfigError(format!(
                    "Multiplexed signal '{}' but no multiplexer found",
                    dbc_sig.name()
                )));
            }
            MultiplexRole::Selected(*value)
        }
        can_dbc::MultiplexIndicator::Plain => MultiplexRole::None,
    };

    let length = *dbc_sig.signal_size() as u16;
    if length == 0 || length > 64 {
        return Err(BmsError::ConfigError(format!(
            "Signal '{}' has unsupported length {}",
            dbc_sig.name(),
            length
        )));
    }

    Ok(SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        choices: choices.filter(|c| !c.is_empty()),
        multiplex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SIMPLE_DBC: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_

BS_:

BU_: BMS PC

BO_ 860 CurrentSensor_Current: 6 BMS
 SG_ CurrentSensor_SIG_Current : 23|32@0- (1,0) [-2147483648|2147483647] "mA" PC

BO_ 512 BatteryStatus: 8 BMS
 SG_ BatteryVoltage : 0|16@1+ (0.01,0) [0|16] "V" PC
 SG_ BatteryState : 16|2@1+ (1,0) [0|3] "" PC

VAL_ 512 BatteryState 0 "Standby" 1 "Normal" 2 "Error" ;
"#;

    #[test]
    fn test_parse_simple_dbc() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(SIMPLE_DBC.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let messages = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(messages.len(), 2);

        let msg1 = &messages[0];
        assert_eq!(msg1.id, 860);
        assert_eq!(msg1.name, "CurrentSensor_Current");
        assert_eq!(msg1.size, 6);
        assert_eq!(msg1.sender, Some("BMS".to_string()));

        let sig = &msg1.signals[0];
        assert_eq!(sig.start_bit, 23);
        assert_eq!(sig.length, 32);
        assert_eq!(sig.byte_order, ByteOrder::BigEndian);
        assert_eq!(sig.value_type, ValueType::Signed);
        assert_eq!(sig.unit, Some("mA".to_string()));

        let state = messages[1].signal("BatteryState").unwrap();
        assert_eq!(state.unit, None);
        assert_eq!(state.choice_label(1), Some("Normal"));
        assert_eq!(state.choice_value("Error"), Some(2));
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 512 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
 SG_ SignalB m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU1
"#;

        let messages = parse_dbc_str(dbc_content, "test.dbc").unwrap();

        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert!(msg.is_multiplexed());
        assert_eq!(msg.selector().map(|s| s.name.as_str()), Some("Mode"));
        assert_eq!(msg.signal("SignalA").unwrap().multiplex, MultiplexRole::Selected(0));
        assert_eq!(msg.signal("SignalB").unwrap().multiplex, MultiplexRole::Selected(1));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = parse_dbc_file(Path::new("/nonexistent/bms.dbc")).unwrap_err();
        assert!(matches!(err, BmsError::ConfigError(_)));
    }
}
