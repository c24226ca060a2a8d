//! Hardware interfaces through SocketCAN
//!
//! PCAN and Kvaser adapters show up as SocketCAN network devices on Linux.
//! `PCAN_USBBUSn` maps to `can{n-1}`, Kvaser channel `n` to `can{n}`.

use crate::bus::CanBus;
use crate::config::{BusConfig, Interface};
use crate::types::{BmsError, Result};

/// SocketCAN device name for a hardware interface channel
pub fn native_channel(config: &BusConfig) -> Result<String> {
    match config.interface {
        Interface::Pcan => {
            let index = config
                .channel
                .trim_start_matches(|c: char| !c.is_ascii_digit())
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    BmsError::ConfigError(format!(
                        "PCAN channel '{}' has no bus number.",
                        config.channel
                    ))
                })?;
            Ok(format!("can{}", index - 1))
        }
        Interface::Kvaser => {
            let index = config.channel.parse::<u32>().map_err(|_| {
                BmsError::ConfigError(format!(
                    "Channel '{}' is not a Kvaser channel number.",
                    config.channel
                ))
            })?;
            Ok(format!("can{}", index))
        }
        Interface::Virtual => Err(BmsError::UnsupportedInterface(config.interface.to_string())),
    }
}

/// Open a hardware interface
pub fn open(config: &BusConfig) -> Result<Box<dyn CanBus>> {
    let device = native_channel(config)?;
    open_device(&device)
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
fn open_device(device: &str) -> Result<Box<dyn CanBus>> {
    Ok(Box::new(adapter::SocketCanBus::open(device)?))
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
fn open_device(device: &str) -> Result<Box<dyn CanBus>> {
    Err(BmsError::AdapterInitError(format!(
        "Hardware interface '{}' needs a Linux build with the 'socketcan' feature.",
        device
    )))
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod adapter {
    use std::io;
    use std::time::Duration;

    use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};

    use crate::bus::{now_seconds, CanBus};
    use crate::types::{BmsError, RawFrame, Result};

    /// SocketCAN raw socket
    pub struct SocketCanBus {
        socket: CanSocket,
        device: String,
    }

    impl SocketCanBus {
        pub fn open(device: &str) -> Result<Self> {
            let socket = CanSocket::open(device).map_err(|e| {
                BmsError::AdapterInitError(format!("Failed to open CAN interface '{}': {}", device, e))
            })?;
            log::info!("SocketCAN interface '{}' opened", device);
            Ok(Self {
                socket,
                device: device.to_string(),
            })
        }
    }

    impl CanBus for SocketCanBus {
        fn recv(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
            match self.socket.read_frame_timeout(timeout) {
                Ok(CanFrame::Data(frame)) => Ok(Some(RawFrame {
                    arbitration_id: frame.raw_id(),
                    data: frame.data().to_vec(),
                    timestamp: now_seconds(),
                    is_rx: true,
                    is_extended: frame.is_extended(),
                })),
                Ok(CanFrame::Remote(_)) => Ok(None),
                Ok(CanFrame::Error(_)) => Err(BmsError::AdapterOpError(format!(
                    "Error frame received on '{}'",
                    self.device
                ))),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    Ok(None)
                }
                Err(e) => Err(BmsError::AdapterOpError(format!(
                    "Receive on '{}' failed: {}",
                    self.device, e
                ))),
            }
        }

        fn send(&mut self, frame: &RawFrame) -> Result<()> {
            let can_frame = if frame.is_extended {
                ExtendedId::new(frame.arbitration_id).and_then(|id| CanFrame::new(id, &frame.data))
            } else {
                StandardId::new(frame.arbitration_id as u16)
                    .and_then(|id| CanFrame::new(id, &frame.data))
            }
            .ok_or_else(|| {
                BmsError::AdapterOpError(format!(
                    "Invalid frame with ID 0x{:X}",
                    frame.arbitration_id
                ))
            })?;

            self.socket.write_frame(&can_frame).map_err(|e| {
                BmsError::AdapterOpError(format!("Transmit on '{}' failed: {}", self.device, e))
            })
        }

        fn shutdown(&mut self) {
            log::debug!("SocketCAN interface '{}' released", self.device);
        }
    }
}
