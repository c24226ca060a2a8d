//! Frame decoder
//!
//! Turns lines of an ASCII CAN trace into JSON records. The timestamp, id
//! and payload are taken from configured token positions, joined with the
//! DBC definition and written either to a single stream or to one file per
//! message (`<dir>/<group>.json`).

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::json::{format_record, KeyStyle};
use crate::codec::Codec;
use crate::config::DecoderConfig;
use crate::filter::{end_on_closed_stream, parse_id_token, StreamOutput};
use crate::types::{BmsError, Result};

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    /// Routing name (`<msg>` or `<msg>_Mux_<selector>`)
    pub group: String,
    /// JSON object including the trailing newline
    pub json: String,
}

/// Counters of one decoder run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub lines_read: u64,
    pub records_written: u64,
    pub lines_skipped: u64,
}

/// Decoder of trace lines
pub struct FrameDecoder {
    codec: Codec,
    timestamp_pos: usize,
    id_pos: usize,
    data_pos: usize,
}

impl FrameDecoder {
    pub fn new(codec: Codec, config: &DecoderConfig) -> Self {
        Self {
            codec,
            timestamp_pos: config.timestamp_pos,
            id_pos: config.id_pos,
            data_pos: config.data_pos,
        }
    }

    /// Load the DBC named by the configuration and build a decoder
    pub fn from_config(config: &DecoderConfig) -> Result<Self> {
        log::info!("Loading DBC file: {:?}", config.dbc);
        let codec = Codec::load(&config.dbc)?;
        let stats = codec.database().stats();
        log::info!(
            "DBC file loaded: {} messages, {} signals",
            stats.num_messages,
            stats.num_signals
        );
        Ok(Self::new(codec, config))
    }

    /// Decode one trace line
    pub fn decode_line(&self, line: &str) -> Result<LineRecord> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let id_token = tokens.get(self.id_pos).ok_or_else(|| {
            BmsError::DecodeError(format!("No id token at position {}", self.id_pos))
        })?;
        let frame_id = parse_id_token(id_token).ok_or_else(|| {
            BmsError::DecodeError(format!("Id '{}' is not hexadecimal", id_token))
        })?;

        let timestamp = tokens.get(self.timestamp_pos).ok_or_else(|| {
            BmsError::DecodeError(format!(
                "No timestamp token at position {}",
                self.timestamp_pos
            ))
        })?;
        if timestamp.parse::<f64>().map(|t| !t.is_finite()).unwrap_or(true) {
            return Err(BmsError::DecodeError(format!(
                "Timestamp '{}' is not a number",
                timestamp
            )));
        }

        let message = self
            .codec
            .database()
            .get_message(frame_id)
            .ok_or_else(|| BmsError::DecodeError(format!("Unknown frame id 0x{:X}", frame_id)))?;

        let data_tokens = tokens
            .get(self.data_pos..self.data_pos + message.size)
            .ok_or_else(|| {
                BmsError::DecodeError(format!(
                    "Line has fewer than {} data bytes for '{}'",
                    message.size, message.name
                ))
            })?;
        let mut payload = Vec::with_capacity(message.size);
        for token in data_tokens {
            let bytes = hex::decode(token).map_err(|e| {
                BmsError::DecodeError(format!("Data byte '{}' is not hexadecimal: {}", token, e))
            })?;
            payload.extend_from_slice(&bytes);
        }

        let decoded = self.codec.decode(frame_id, &payload)?;
        Ok(LineRecord {
            group: decoded.group_name(),
            json: format_record(timestamp, &decoded, KeyStyle::Decimal),
        })
    }

    /// Decode a whole stream into `sink`
    ///
    /// Undecodable lines are logged and skipped.
    pub fn decode_stream<R: BufRead>(&self, input: R, sink: &mut RecordSink) -> Result<DecodeStats> {
        let mut stats = DecodeStats::default();
        let mut input = input;
        let mut buf = Vec::with_capacity(128);

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            stats.lines_read += 1;
            let line = String::from_utf8_lossy(&buf);

            match self.decode_line(&line) {
                Ok(record) => {
                    sink.write(&record)?;
                    stats.records_written += 1;
                }
                Err(e) => {
                    log::info!("Skipping line {}: {}", stats.lines_read, e);
                    stats.lines_skipped += 1;
                }
            }
        }

        sink.finish()?;
        if stats.records_written == 0 {
            log::warn!("No CAN message was decoded. Check configuration file.");
        }
        log::info!(
            "Decoded {} records from {} lines ({} skipped)",
            stats.records_written,
            stats.lines_read,
            stats.lines_skipped
        );
        Ok(stats)
    }

    /// Decode into an output stream such as stdout
    ///
    /// A stream that can no longer be written ends the run without an error.
    pub fn decode_to_stream<R: BufRead, W: Write + 'static>(
        &self,
        input: R,
        output: W,
    ) -> Result<DecodeStats> {
        let output = StreamOutput::new(BufWriter::new(output));
        let failed = output.failure();
        let mut sink = RecordSink::Stream(Box::new(output));
        let result = self.decode_stream(input, &mut sink);
        end_on_closed_stream(result, &failed)
    }
}

/// Destination of decoded records
pub enum RecordSink {
    /// Every record on one stream
    Stream(Box<dyn Write>),
    /// One file per group in a directory
    Directory(DirectorySink),
}

impl RecordSink {
    pub fn directory(dir: &Path) -> Result<Self> {
        Ok(RecordSink::Directory(DirectorySink::create(dir)?))
    }

    pub fn write(&mut self, record: &LineRecord) -> Result<()> {
        match self {
            RecordSink::Stream(out) => out.write_all(record.json.as_bytes())?,
            RecordSink::Directory(sink) => sink.write(record)?,
        }
        Ok(())
    }

    /// Flush everything written so far
    pub fn finish(&mut self) -> Result<()> {
        match self {
            RecordSink::Stream(out) => out.flush()?,
            RecordSink::Directory(sink) => sink.finish()?,
        }
        Ok(())
    }
}

/// File-per-group sink
///
/// Files are truncated when first used in a run and stay open until the sink
/// is dropped.
pub struct DirectorySink {
    dir: PathBuf,
    files: HashMap<String, BufWriter<File>>,
}

impl DirectorySink {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| BmsError::io_at(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: HashMap::new(),
        })
    }

    pub fn write(&mut self, record: &LineRecord) -> Result<()> {
        if !self.files.contains_key(&record.group) {
            let path = self.dir.join(format!("{}.json", record.group));
            let file = File::create(&path).map_err(|e| BmsError::io_at(&path, e))?;
            log::debug!("Writing {} records to {:?}", record.group, path);
            self.files.insert(record.group.clone(), BufWriter::new(file));
        }
        if let Some(file) = self.files.get_mut(&record.group) {
            file.write_all(record.json.as_bytes())?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        for file in self.files.values_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for DirectorySink {
    fn drop(&mut self) {
        for (group, file) in self.files.iter_mut() {
            if let Err(e) = file.flush() {
                log::warn!("Could not flush {}.json: {}", group, e);
            }
        }
    }
}

/// Run the decoder with the I/O selected by the configuration
pub fn run_decoder(config: &DecoderConfig) -> Result<DecodeStats> {
    let decoder = FrameDecoder::from_config(config)?;

    let input: Box<dyn BufRead> = match &config.input {
        Some(path) => {
            let file = File::open(path).map_err(|e| BmsError::io_at(path, e))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    match &config.output {
        Some(dir) => {
            let mut sink = RecordSink::directory(dir)?;
            decoder.decode_stream(input, &mut sink)
        }
        None => decoder.decode_to_stream(input, io::stdout().lock()),
    }
}
