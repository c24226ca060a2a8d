//! JSON serialization of decoded frames
//!
//! One object per line: `{"Timestamp": <ts>,"<key>":<value>,...}`. Keys are
//! `<id>_<signal>_<unit>` with the id in decimal (file decoder) or as
//! `0x<HEX>` (decoded-message stream). Signals with a unit are written as
//! JSON numbers, signals without unit and enum labels as JSON strings. The
//! multiplexer selector is not written; it is part of the routing name.

use crate::codec::DecodedMessage;
use crate::signals::{MultiplexRole, SignalDefinition};
use crate::types::SignalValue;

/// How the frame id is rendered in field keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStyle {
    /// `860_Signal_mA`
    #[default]
    Decimal,
    /// `0x35C_Signal_mA`
    Hex,
}

/// Field key for a signal
pub fn field_key(style: KeyStyle, frame_id: u32, signal: &SignalDefinition) -> String {
    let unit = signal.unit.as_deref().unwrap_or("None");
    match style {
        KeyStyle::Decimal => format!("{}_{}_{}", frame_id, signal.name, unit),
        KeyStyle::Hex => format!("0x{:X}_{}_{}", frame_id, signal.name, unit),
    }
}

fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

/// JSON text for a signal value
pub fn field_value(signal: &SignalDefinition, value: &SignalValue) -> String {
    match value {
        SignalValue::Label(label) => json_string(label),
        _ if signal.unit.is_none() => json_string(&value.to_string()),
        SignalValue::Integer(v) => v.to_string(),
        SignalValue::Float(v) => serde_json::to_string(v).unwrap_or_else(|_| "null".to_string()),
    }
}

/// Serialize one decoded frame as a JSON line (newline included)
///
/// `timestamp` is inserted verbatim; callers make sure it is numeric.
pub fn format_record(timestamp: &str, decoded: &DecodedMessage<'_>, style: KeyStyle) -> String {
    let mut line = String::with_capacity(64);
    line.push_str("{\"Timestamp\": ");
    line.push_str(timestamp);

    for (name, value) in decoded.fields().iter() {
        let Some(signal) = decoded.message.signal(name) else {
            continue;
        };
        if signal.multiplex == MultiplexRole::Selector {
            continue;
        }
        line.push(',');
        line.push_str(&json_string(&field_key(style, decoded.message.id, signal)));
        line.push(':');
        line.push_str(&field_value(signal, value));
    }

    line.push_str("}\n");
    line
}
