//! In-process CAN network
//!
//! Every bus attached to the same channel of a [`VirtualNetwork`] receives
//! the frames sent by every other bus on that channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::bus::{now_seconds, CanBus};
use crate::types::{BmsError, RawFrame, Result};

type Members = HashMap<String, Vec<(usize, Sender<RawFrame>)>>;

/// Shared handle of an in-process network
#[derive(Debug, Clone, Default)]
pub struct VirtualNetwork {
    members: Arc<Mutex<Members>>,
    next_id: Arc<AtomicUsize>,
}

impl VirtualNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new bus to `channel`
    pub fn attach(&self, channel: &str) -> VirtualBus {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded();
        self.members
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        log::debug!("Virtual bus {} attached to channel '{}'", id, channel);

        VirtualBus {
            id,
            channel: channel.to_string(),
            rx,
            network: self.clone(),
            attached: true,
        }
    }

    fn detach(&self, channel: &str, id: usize) {
        let mut members = self.members.lock();
        if let Some(buses) = members.get_mut(channel) {
            buses.retain(|(member, _)| *member != id);
            if buses.is_empty() {
                members.remove(channel);
            }
        }
    }

    /// Number of buses attached to `channel`
    pub fn members(&self, channel: &str) -> usize {
        self.members.lock().get(channel).map_or(0, Vec::len)
    }

    fn broadcast(&self, channel: &str, sender: usize, frame: &RawFrame) {
        let members = self.members.lock();
        let Some(buses) = members.get(channel) else {
            return;
        };
        let timestamp = now_seconds();
        for (id, tx) in buses.iter().filter(|(id, _)| *id != sender) {
            let received = RawFrame {
                timestamp,
                is_rx: true,
                ..frame.clone()
            };
            if tx.send(received).is_err() {
                log::trace!("Virtual bus {} is gone", id);
            }
        }
    }
}

/// One endpoint of a [`VirtualNetwork`]
#[derive(Debug)]
pub struct VirtualBus {
    id: usize,
    channel: String,
    rx: Receiver<RawFrame>,
    network: VirtualNetwork,
    attached: bool,
}

impl CanBus for VirtualBus {
    fn recv(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BmsError::AdapterOpError(format!(
                "Virtual bus on channel '{}' is detached",
                self.channel
            ))),
        }
    }

    fn send(&mut self, frame: &RawFrame) -> Result<()> {
        if !self.attached {
            return Err(BmsError::AdapterOpError(format!(
                "Virtual bus on channel '{}' is shut down",
                self.channel
            )));
        }
        self.network.broadcast(&self.channel, self.id, frame);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.attached {
            self.network.detach(&self.channel, self.id);
            self.attached = false;
        }
    }
}

impl Drop for VirtualBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_reach_other_members_only() {
        let network = VirtualNetwork::new();
        let mut a = network.attach("vcan0");
        let mut b = network.attach("vcan0");
        let mut other = network.attach("vcan1");

        a.send(&RawFrame::new(0x300, vec![1, 2])).unwrap();

        let frame = b.recv(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(frame.arbitration_id, 0x300);
        assert_eq!(frame.data, vec![1, 2]);
        assert!(frame.is_rx);
        assert!(frame.timestamp > 0.0);

        assert!(a.recv(Duration::from_millis(1)).unwrap().is_none());
        assert!(other.recv(Duration::from_millis(1)).unwrap().is_none());
    }

    #[test]
    fn test_shutdown_detaches() {
        let network = VirtualNetwork::new();
        let mut a = network.attach("vcan0");
        {
            let _b = network.attach("vcan0");
            assert_eq!(network.members("vcan0"), 2);
        }
        assert_eq!(network.members("vcan0"), 1);

        a.shutdown();
        assert_eq!(network.members("vcan0"), 0);
        assert!(a.send(&RawFrame::new(1, vec![])).is_err());
    }
}
