//! Bit packing of signals into classic CAN payloads
//!
//! The payload (at most 8 bytes) is viewed as one 64-bit word: read
//! little-endian for Intel signals, big-endian for Motorola signals. Both
//! extraction and insertion are then a shift and a mask.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::signals::{ByteOrder, SignalDefinition};
use crate::types::MAX_PAYLOAD;

fn mask(length: u16) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    }
}

/// Shift of the signal's LSB inside the 64-bit word, or `None` if the
/// signal does not fit into `size` bytes.
fn shift(signal: &SignalDefinition, size: usize) -> Option<u32> {
    let size_bits = size.min(MAX_PAYLOAD) * 8;
    let start = signal.start_bit as usize;
    let length = signal.length as usize;

    match signal.byte_order {
        ByteOrder::LittleEndian => {
            if start + length > size_bits {
                return None;
            }
            Some(start as u32)
        }
        ByteOrder::BigEndian => {
            // Motorola start bit is the MSB in sawtooth numbering; convert
            // it to a linear position counted from the first transmitted bit.
            let msb = (start / 8) * 8 + (7 - start % 8);
            let lsb = msb + length - 1;
            if lsb >= size_bits {
                return None;
            }
            Some((63 - lsb) as u32)
        }
    }
}

fn padded(data: &[u8]) -> [u8; MAX_PAYLOAD] {
    let mut buf = [0u8; MAX_PAYLOAD];
    let len = data.len().min(MAX_PAYLOAD);
    buf[..len].copy_from_slice(&data[..len]);
    buf
}

/// Extract the raw (unsigned) bits of a signal
pub fn extract(data: &[u8], signal: &SignalDefinition) -> Option<u64> {
    let shift = shift(signal, data.len())?;
    let buf = padded(data);
    let word = match signal.byte_order {
        ByteOrder::LittleEndian => LittleEndian::read_u64(&buf),
        ByteOrder::BigEndian => BigEndian::read_u64(&buf),
    };
    Some((word >> shift) & mask(signal.length))
}

/// Write the raw bits of a signal into `data`
///
/// Returns `false` (leaving `data` untouched) if the signal does not fit.
pub fn insert(data: &mut [u8], signal: &SignalDefinition, raw: u64) -> bool {
    let Some(shift) = shift(signal, data.len()) else {
        return false;
    };
    let mut buf = padded(data);
    let field = mask(signal.length) << shift;
    let bits = (raw & mask(signal.length)) << shift;

    match signal.byte_order {
        ByteOrder::LittleEndian => {
            let word = LittleEndian::read_u64(&buf);
            LittleEndian::write_u64(&mut buf, (word & !field) | bits);
        }
        ByteOrder::BigEndian => {
            let word = BigEndian::read_u64(&buf);
            BigEndian::write_u64(&mut buf, (word & !field) | bits);
        }
    }

    let len = data.len().min(MAX_PAYLOAD);
    data[..len].copy_from_slice(&buf[..len]);
    true
}

/// Sign-extend a value from N bits to 64 bits
pub fn sign_extend(value: u64, bit_length: u16) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        (value | (!0u64 << bit_length)) as i64
    } else {
        value as i64
    }
}

/// Range of raw values representable by the signal
pub fn raw_bounds(signal: &SignalDefinition) -> (i128, i128) {
    let length = u32::from(signal.length);
    match signal.value_type {
        crate::signals::ValueType::Unsigned => (0, (1i128 << length) - 1),
        crate::signals::ValueType::Signed => (-(1i128 << (length - 1)), (1i128 << (length - 1)) - 1),
    }
}
