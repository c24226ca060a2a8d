//! Inbound frame monitor
//!
//! Re-bases frame timestamps to the first frame seen in a session and
//! optionally writes every decodable frame as a JSON line to a stream file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::codec::json::{format_record, KeyStyle};
use crate::codec::Codec;
use crate::filter::create_output_file;
use crate::types::{RawFrame, Result};

/// Timestamp re-basing and the decoded-message stream
pub struct Monitor {
    first_timestamp: Option<f64>,
    stream: Option<BufWriter<File>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            first_timestamp: None,
            stream: None,
        }
    }

    /// Also write decoded frames to `path`
    pub fn with_stream(mut self, path: &Path) -> Result<Self> {
        self.stream = Some(BufWriter::new(create_output_file(path)?));
        log::info!("Writing decoded messages to {:?}", path);
        Ok(self)
    }

    /// Forget the first timestamp; the next frame starts at 0
    pub fn reset(&mut self) {
        self.first_timestamp = None;
    }

    /// Re-base the frame timestamp in place
    pub fn rebase(&mut self, frame: &mut RawFrame) {
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);
        frame.timestamp -= first;
    }

    /// Re-base a frame and record it on the stream
    pub fn observe(&mut self, codec: &Codec, frame: &mut RawFrame) {
        self.rebase(frame);
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match codec.decode(frame.arbitration_id, &frame.data) {
            Ok(decoded) => {
                let record = format_record(&format!("{:.6}", frame.timestamp), &decoded, KeyStyle::Hex);
                if let Err(e) = stream.write_all(record.as_bytes()) {
                    log::warn!("Could not write decoded message stream: {}", e);
                }
            }
            Err(e) => log::trace!("Not streamed: {}", e),
        }
    }

    pub fn flush(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.flush() {
                log::warn!("Could not flush decoded message stream: {}", e);
            }
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_is_zero() {
        let mut monitor = Monitor::new();
        let mut first = RawFrame::received(1, vec![], 1000.25);
        let mut second = RawFrame::received(1, vec![], 1002.75);
        monitor.rebase(&mut first);
        monitor.rebase(&mut second);
        assert_eq!(first.timestamp, 0.0);
        assert_eq!(second.timestamp, 2.5);

        monitor.reset();
        let mut third = RawFrame::received(1, vec![], 5000.0);
        monitor.rebase(&mut third);
        assert_eq!(third.timestamp, 0.0);
    }
}
