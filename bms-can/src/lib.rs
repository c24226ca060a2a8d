//! BMS CAN Toolchain Library
//!
//! Capture, filter, decode and replay CAN frames exchanged with a battery
//! management system, and drive it through the debug messages of its DBC
//! database.
//!
//! # Architecture
//!
//! - [`codec`]: DBC-driven encoder/decoder, including multiplexed messages
//! - [`filter`]: id allow-list and down-sampling over ASCII CAN traces
//! - [`decoder`]: ASCII trace lines to JSON records, one file per message
//! - [`table`]: JSON records to CSV/Parquet tables with an as-of join
//! - [`bus`]: CAN adapters, the bus I/O worker thread and the rolling ASC log
//! - [`shell`]: the request shell state machine behind `bms`
//!
//! The command line front-end lives in the `bms-can-cli` crate.
//!
//! # Example Usage
//!
//! ```no_run
//! use bms_can::{Codec, FieldMap};
//! use std::path::Path;
//!
//! let codec = Codec::load(Path::new("bms.dbc")).unwrap();
//!
//! let decoded = codec.decode(860, &[0x00, 0x04, 0xFF, 0xFF, 0xF4, 0xA4]).unwrap();
//! println!("{}: {}", decoded.group_name(), decoded.fields());
//!
//! let fields = FieldMap::new()
//!     .with("f_Debug_Mux", "FramInitialization")
//!     .with("f_Debug_FramInitialization_InitializeFram", 1);
//! let frame = codec.encode_frame("f_Debug", &fields).unwrap();
//! println!("{:X}: {}", frame.arbitration_id, frame.data_hex());
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod filter;
pub mod shell;
pub mod signals;
pub mod table;
pub mod types;

pub use codec::{Codec, DecodedMessage, MessageView};
pub use config::{BusConfig, DecoderConfig, FilterConfig, Interface, RawLogConfig, ShellConfig, TableConfig};
pub use decoder::{run_decoder, FrameDecoder};
pub use filter::{run_filter, FrameFilter};
pub use signals::DbcDatabase;
pub use types::{BmsError, FieldMap, RawFrame, Result, SignalValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
