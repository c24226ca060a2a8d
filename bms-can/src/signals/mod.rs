//! CAN database and DBC parser
//!
//! This module contains the DBC parser and the immutable database built from it.

pub mod dbc;
pub mod database;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, DbcDatabase, MessageDefinition, MultiplexRole, SignalDefinition,
    ValueType,
};
