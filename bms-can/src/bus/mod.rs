//! CAN bus access
//!
//! [`CanBus`] is the adapter seam: the worker only ever talks to a boxed
//! `CanBus` obtained from a [`BusOpener`]. The system opener backs the
//! `virtual` interface with an in-process network and `pcan`/`kvaser` with
//! SocketCAN.

pub mod asc;
pub mod error_budget;
pub mod native;
pub mod virtual_bus;
pub mod worker;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{BusConfig, Interface};
use crate::types::{RawFrame, Result};

pub use asc::AscWriter;
pub use error_budget::ErrorBudget;
pub use virtual_bus::{VirtualBus, VirtualNetwork};
pub use worker::{BusWorker, Control, WorkerOptions, WorkerStatus};

/// An open CAN adapter
pub trait CanBus: Send {
    /// Wait up to `timeout` for a frame; `Ok(None)` when nothing arrived
    fn recv(&mut self, timeout: Duration) -> Result<Option<RawFrame>>;

    /// Transmit a frame
    fn send(&mut self, frame: &RawFrame) -> Result<()>;

    /// Release the adapter
    fn shutdown(&mut self) {}
}

/// Factory of CAN adapters
pub trait BusOpener: Send + Sync {
    fn open(&self, config: &BusConfig) -> Result<Box<dyn CanBus>>;
}

/// Opener for the interfaces supported on this system
#[derive(Debug, Clone, Default)]
pub struct SystemBusOpener {
    network: VirtualNetwork,
}

impl SystemBusOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `network` for the `virtual` interface
    pub fn with_network(network: VirtualNetwork) -> Self {
        Self { network }
    }
}

impl BusOpener for SystemBusOpener {
    fn open(&self, config: &BusConfig) -> Result<Box<dyn CanBus>> {
        log::info!(
            "Opening CAN bus: {} channel {} at {} bit/s",
            config.interface,
            config.channel,
            config.bitrate
        );
        match config.interface {
            Interface::Virtual => Ok(Box::new(self.network.attach(&config.channel))),
            Interface::Pcan | Interface::Kvaser => native::open(config),
        }
    }
}

/// Wall-clock time in seconds since the Unix epoch
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
