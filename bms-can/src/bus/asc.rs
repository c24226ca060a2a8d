//! Rolling Vector ASCII trace writer
//!
//! Frames are written as `<ts> 1  <id> <Rx|Tx> d <dlc> <bytes>` with
//! timestamps relative to the first logged frame. When the active file
//! reaches the configured size it is renamed to
//! `<stem>_<YYYYmmddTHHMMSS>_#<NNN><ext>` and a fresh file is started.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::RawLogConfig;
use crate::types::{BmsError, RawFrame, Result};

const HEADER_DATE_FORMAT: &str = "%a %b %d %I:%M:%S%.3f %p %Y";

/// One trace line for a frame at relative time `timestamp`
pub fn format_frame(frame: &RawFrame, timestamp: f64) -> String {
    let id = if frame.is_extended {
        format!("{:X}x", frame.arbitration_id)
    } else {
        format!("{:X}", frame.arbitration_id)
    };
    let direction = if frame.is_rx { "Rx" } else { "Tx" };
    format!(
        "{:>11.6} 1  {:<15} {:<4} d {:x} {}\n",
        timestamp,
        id,
        direction,
        frame.dlc(),
        frame.data_hex()
    )
}

fn header() -> String {
    let now = Local::now().format(HEADER_DATE_FORMAT).to_string();
    format!(
        "date {now}\n\
         base hex  timestamps absolute\n\
         internal events logged\n\
         // version 9.0.0\n\
         Begin Triggerblock {now}\n\
         {:>11.6} Start of measurement\n",
        0.0
    )
}

const FOOTER: &str = "End TriggerBlock\n";

/// Size-based rolling ASC logger
pub struct AscWriter {
    config: RawLogConfig,
    file: Option<BufWriter<File>>,
    bytes: u64,
    first_timestamp: Option<f64>,
    rotated: VecDeque<PathBuf>,
    sequence: u32,
}

impl AscWriter {
    /// Create the log directory and start the active file
    pub fn create(config: RawLogConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.directory)
            .map_err(|e| BmsError::io_at(&config.directory, e))?;
        let mut writer = Self {
            config,
            file: None,
            bytes: 0,
            first_timestamp: None,
            rotated: VecDeque::new(),
            sequence: 0,
        };
        writer.start_file()?;
        log::info!("Logging raw CAN traffic to {:?}", writer.config.path());
        Ok(writer)
    }

    pub fn path(&self) -> PathBuf {
        self.config.path()
    }

    /// Rotated files still on disk, oldest first
    pub fn rotated_files(&self) -> impl Iterator<Item = &Path> {
        self.rotated.iter().map(PathBuf::as_path)
    }

    fn start_file(&mut self) -> Result<()> {
        let path = self.config.path();
        let mut file = BufWriter::new(File::create(&path).map_err(|e| BmsError::io_at(&path, e))?);
        let header = header();
        file.write_all(header.as_bytes())?;
        self.bytes = header.len() as u64;
        self.file = Some(file);
        Ok(())
    }

    fn finish_file(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(FOOTER.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    fn rotated_name(&self) -> PathBuf {
        let active = Path::new(&self.config.base_name);
        let stem = active
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = active
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = Local::now().format("%Y%m%dT%H%M%S");
        self.config
            .directory
            .join(format!("{}_{}_#{:03}{}", stem, stamp, self.sequence, ext))
    }

    fn rollover(&mut self) -> Result<()> {
        self.finish_file()?;
        self.sequence += 1;

        let target = self.rotated_name();
        let active = self.config.path();
        std::fs::rename(&active, &target).map_err(|e| BmsError::io_at(&active, e))?;
        log::debug!("Rolled over raw log to {:?}", target);
        self.rotated.push_back(target);

        if self.config.backup_count > 0 {
            while self.rotated.len() > self.config.backup_count {
                if let Some(oldest) = self.rotated.pop_front() {
                    if let Err(e) = std::fs::remove_file(&oldest) {
                        log::warn!("Could not remove old raw log {:?}: {}", oldest, e);
                    }
                }
            }
        }

        self.start_file()
    }

    /// Append a frame, rolling over when the file is full
    pub fn log(&mut self, frame: &RawFrame) -> Result<()> {
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);
        let line = format_frame(frame, (frame.timestamp - first).max(0.0));

        let Some(file) = self.file.as_mut() else {
            return Err(BmsError::IoError(std::io::Error::other("raw log is closed")));
        };
        file.write_all(line.as_bytes())?;
        self.bytes += line.len() as u64;

        if self.config.max_bytes > 0 && self.bytes >= self.config.max_bytes {
            self.rollover()?;
        }
        Ok(())
    }

    /// Write the footer and close the active file
    pub fn close(mut self) -> Result<()> {
        self.finish_file()
    }
}

impl Drop for AscWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish_file() {
            log::warn!("Could not close raw log: {}", e);
        }
    }
}
