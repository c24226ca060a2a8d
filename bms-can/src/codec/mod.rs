//! DBC codec
//!
//! Translates field maps into bit-packed payloads and back, driven by a
//! [`DbcDatabase`]. Multiplexed messages decode into [`MessageView::Muxed`],
//! so callers always see which selector value produced the fields.

pub mod bits;
pub mod json;

use std::path::Path;
use std::sync::Arc;

use crate::signals::{DbcDatabase, MessageDefinition, MultiplexRole, SignalDefinition, ValueType};
use crate::types::{BmsError, FieldMap, RawFrame, Result, SignalValue, MAX_PAYLOAD};

/// Decoded content of one frame
#[derive(Debug, Clone, PartialEq)]
pub enum MessageView {
    /// A message without multiplexer
    Base(FieldMap),
    /// A multiplexed message; `fields` holds the selector and its group
    Muxed { selector: u64, fields: FieldMap },
}

impl MessageView {
    pub fn fields(&self) -> &FieldMap {
        match self {
            MessageView::Base(fields) => fields,
            MessageView::Muxed { fields, .. } => fields,
        }
    }

    pub fn selector(&self) -> Option<u64> {
        match self {
            MessageView::Base(_) => None,
            MessageView::Muxed { selector, .. } => Some(*selector),
        }
    }
}

/// A decoded frame together with the definition it was decoded with
#[derive(Debug, Clone)]
pub struct DecodedMessage<'a> {
    pub message: &'a MessageDefinition,
    pub view: MessageView,
}

impl DecodedMessage<'_> {
    pub fn name(&self) -> &str {
        &self.message.name
    }

    /// Routing name: the message name, or `<name>_Mux_<selector>`
    pub fn group_name(&self) -> String {
        match self.view.selector() {
            Some(selector) => format!("{}_Mux_{}", self.message.name, selector),
            None => self.message.name.clone(),
        }
    }

    pub fn fields(&self) -> &FieldMap {
        self.view.fields()
    }
}

/// Encoder/decoder bound to one CAN database
///
/// Cheap to clone; all clones share the same immutable database.
#[derive(Debug, Clone)]
pub struct Codec {
    db: Arc<DbcDatabase>,
}

impl Codec {
    pub fn new(db: Arc<DbcDatabase>) -> Self {
        Self { db }
    }

    /// Load a DBC file and build a codec for it
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(DbcDatabase::load(path)?)))
    }

    pub fn database(&self) -> &DbcDatabase {
        &self.db
    }

    /// Encode a field map into a payload of exactly the message length
    ///
    /// With `pad`, bits not covered by a given signal are set to 1 (bytes
    /// default to 0xFF); otherwise they are 0.
    pub fn encode(&self, message_name: &str, fields: &FieldMap, pad: bool) -> Result<Vec<u8>> {
        let message = self.db.require_by_name(message_name)?;
        if message.size > MAX_PAYLOAD {
            return Err(BmsError::EncodeError(format!(
                "Message '{}' is {} bytes long, only classic CAN frames are supported",
                message.name, message.size
            )));
        }

        let selector_value = match message.selector() {
            Some(selector) => {
                let value = fields.get(&selector.name).ok_or_else(|| {
                    BmsError::EncodeError(format!(
                        "Missing multiplexer selector '{}' for message '{}'",
                        selector.name, message.name
                    ))
                })?;
                let raw = to_raw(selector, value)? as u64;
                if !message.has_group(raw) {
                    return Err(BmsError::EncodeError(format!(
                        "Message '{}' has no multiplexed group for selector value {}",
                        message.name, raw
                    )));
                }
                Some(raw)
            }
            None => None,
        };

        let mut data = vec![if pad { 0xFF } else { 0x00 }; message.size];
        for (name, value) in fields.iter() {
            let signal = message.signal(name).ok_or_else(|| {
                BmsError::EncodeError(format!(
                    "Unknown signal '{}' in message '{}'",
                    name, message.name
                ))
            })?;
            if let MultiplexRole::Selected(group) = signal.multiplex {
                if Some(group) != selector_value {
                    return Err(BmsError::EncodeError(format!(
                        "Signal '{}' belongs to multiplexed group {} but the selector is {:?}",
                        name, group, selector_value
                    )));
                }
            }

            let raw = to_raw(signal, value)?;
            if !bits::insert(&mut data, signal, raw as u64) {
                return Err(BmsError::EncodeError(format!(
                    "Signal '{}' does not fit into {} bytes",
                    name, message.size
                )));
            }
        }

        log::trace!("Encoded {} -> {:02X?}", message.name, data);
        Ok(data)
    }

    /// Encode a field map into a frame ready for transmission (timestamp 0)
    pub fn encode_frame(&self, message_name: &str, fields: &FieldMap) -> Result<RawFrame> {
        let data = self.encode(message_name, fields, true)?;
        let message = self.db.require_by_name(message_name)?;
        Ok(RawFrame::new(message.id, data))
    }

    /// Decode a payload
    ///
    /// Fails when the frame id is unknown, the payload is shorter than the
    /// message, or the selector value has no multiplexed group.
    pub fn decode(&self, frame_id: u32, data: &[u8]) -> Result<DecodedMessage<'_>> {
        let message = self.db.get_message(frame_id).ok_or_else(|| {
            BmsError::DecodeError(format!("Unknown frame id 0x{:X}", frame_id))
        })?;
        if data.len() < message.size {
            return Err(BmsError::DecodeError(format!(
                "Payload of {} bytes is shorter than the {} bytes of '{}'",
                data.len(),
                message.size,
                message.name
            )));
        }
        let data = &data[..message.size];

        let selector_value = match message.selector() {
            Some(selector) => {
                let raw = bits::extract(data, selector).ok_or_else(|| {
                    BmsError::DecodeError(format!(
                        "Selector '{}' does not fit into '{}'",
                        selector.name, message.name
                    ))
                })?;
                if !message.has_group(raw) {
                    return Err(BmsError::DecodeError(format!(
                        "Selector value {} of '{}' has no multiplexed group",
                        raw, message.name
                    )));
                }
                Some(raw)
            }
            None => None,
        };

        let mut fields = FieldMap::new();
        for signal in message.signals_for(selector_value) {
            let value = decode_signal(data, signal).ok_or_else(|| {
                BmsError::DecodeError(format!(
                    "Signal '{}' does not fit into '{}'",
                    signal.name, message.name
                ))
            })?;
            fields.insert(signal.name.clone(), value);
        }

        let view = match selector_value {
            Some(selector) => MessageView::Muxed { selector, fields },
            None => MessageView::Base(fields),
        };
        Ok(DecodedMessage { message, view })
    }
}

/// Decode a single signal into its physical value
fn decode_signal(data: &[u8], signal: &SignalDefinition) -> Option<SignalValue> {
    let bits = bits::extract(data, signal)?;
    let raw = match signal.value_type {
        ValueType::Unsigned => bits as i64,
        ValueType::Signed => bits::sign_extend(bits, signal.length),
    };

    if let Some(label) = signal.choice_label(raw) {
        return Some(SignalValue::Label(label.to_string()));
    }

    let physical = signal.offset + signal.factor * (raw as f64);
    if signal.factor.fract() == 0.0 && signal.offset.fract() == 0.0 {
        Some(SignalValue::Integer(physical as i64))
    } else {
        Some(SignalValue::Float(physical))
    }
}

/// Convert a physical value (or label) into the raw integer of a signal
fn to_raw(signal: &SignalDefinition, value: &SignalValue) -> Result<i64> {
    let raw = match value {
        SignalValue::Label(label) => {
            i128::from(signal.choice_value(label).ok_or_else(|| {
                BmsError::EncodeError(format!(
                    "Invalid value '{}' for signal '{}'",
                    label, signal.name
                ))
            })?)
        }
        numeric => {
            let physical = numeric
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    BmsError::EncodeError(format!(
                        "Value {} of signal '{}' is not a finite number",
                        numeric, signal.name
                    ))
                })?;
            if signal.has_range() && (physical < signal.min || physical > signal.max) {
                return Err(BmsError::EncodeError(format!(
                    "Value {} of signal '{}' is outside [{}, {}]",
                    physical, signal.name, signal.min, signal.max
                )));
            }
            ((physical - signal.offset) / signal.factor).round() as i128
        }
    };

    let (low, high) = bits::raw_bounds(signal);
    if raw < low || raw > high {
        return Err(BmsError::EncodeError(format!(
            "Value {} of signal '{}' does not fit into {} bits",
            value, signal.name, signal.length
        )));
    }
    Ok(raw as i64)
}
