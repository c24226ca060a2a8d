//! Frame filter
//!
//! Selects lines of an ASCII CAN trace by frame id. Each line is
//! whitespace-tokenized and the token at `id_pos` is read as a hex id.
//! Lines with too few tokens (trace headers) or a non-hex id are dropped.
//! Accepted lines are written unchanged.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::FilterConfig;
use crate::types::{BmsError, Result};

/// Parse a hex id token; a trailing `x` (extended id in ASC traces) is accepted
pub fn parse_id_token(token: &str) -> Option<u32> {
    let token = token
        .strip_suffix('x')
        .or_else(|| token.strip_suffix('X'))
        .unwrap_or(token);
    if token.is_empty() {
        return None;
    }
    u32::from_str_radix(token, 16).ok()
}

/// Counters of one filter run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub lines_read: u64,
    pub lines_written: u64,
}

/// Stateful line selector
///
/// Only the down-sampling counters carry state from one line to the next.
#[derive(Debug, Clone)]
pub struct FrameFilter {
    id_pos: usize,
    ids: HashSet<u32>,
    sampling: HashMap<u32, u32>,
    counters: HashMap<u32, u32>,
}

impl FrameFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            id_pos: config.id_pos,
            ids: config.ids.iter().copied().collect(),
            sampling: config.sampling.clone(),
            counters: HashMap::new(),
        }
    }

    /// Decide whether a line passes
    pub fn accept(&mut self, line: &str) -> bool {
        let Some(token) = line.split_whitespace().nth(self.id_pos) else {
            return false;
        };
        let Some(id) = parse_id_token(token) else {
            return false;
        };
        if !self.ids.contains(&id) {
            return false;
        }

        match self.sampling.get(&id) {
            None => true,
            Some(&period) => {
                let counter = self.counters.entry(id).or_insert(0);
                *counter += 1;
                if *counter % period == 0 {
                    *counter = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Filter a whole stream
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, output: &mut W) -> Result<FilterStats> {
        let mut stats = FilterStats::default();
        let mut buf = Vec::with_capacity(128);

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            stats.lines_read += 1;

            let line = String::from_utf8_lossy(&buf);
            if self.accept(&line) {
                output.write_all(&buf)?;
                stats.lines_written += 1;
            }
        }

        output.flush()?;
        log::debug!(
            "Filter passed {} of {} lines",
            stats.lines_written,
            stats.lines_read
        );
        Ok(stats)
    }

    /// Filter into an output stream such as stdout
    ///
    /// If the stream can no longer be written, "Output stream closed." is
    /// printed to stderr and the run ends without an error.
    pub fn run_to_stream<R: BufRead, W: Write>(&mut self, input: R, output: W) -> Result<FilterStats> {
        let mut output = StreamOutput::new(BufWriter::new(output));
        let failed = output.failure();
        let result = self.run(input, &mut output);
        end_on_closed_stream(result, &failed)
    }
}

/// Open an output file, creating its parent directories
pub(crate) fn create_output_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BmsError::io_at(parent, e))?;
    }
    File::create(path).map_err(|e| BmsError::io_at(path, e))
}

/// Run the filter with the I/O selected by the configuration
///
/// Input and output default to stdin and stdout. A closed stdout ends the
/// run gracefully.
pub fn run_filter(config: &FilterConfig) -> Result<FilterStats> {
    let mut filter = FrameFilter::new(config);

    let input: Box<dyn BufRead> = match &config.input {
        Some(path) => {
            let file = File::open(path).map_err(|e| BmsError::io_at(path, e))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    match &config.output {
        Some(path) => {
            let mut output = BufWriter::new(create_output_file(path)?);
            filter.run(input, &mut output)
        }
        None => filter.run_to_stream(input, io::stdout().lock()),
    }
}

/// Writer that remembers whether a write or flush on it failed
pub(crate) struct StreamOutput<W> {
    inner: W,
    failed: Arc<AtomicBool>,
}

impl<W: Write> StreamOutput<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn failure(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    fn track<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.failed.store(true, Ordering::Relaxed);
        }
        result
    }
}

impl<W: Write> Write for StreamOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf);
        self.track(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.inner.flush();
        self.track(result)
    }
}

/// End a run quietly when its output stream failed
///
/// Read errors and every other error are passed through.
pub(crate) fn end_on_closed_stream<T: Default>(result: Result<T>, failed: &AtomicBool) -> Result<T> {
    match result {
        Err(BmsError::IoError(e)) if failed.load(Ordering::Relaxed) => {
            log::debug!("Writing to the output stream failed: {}", e);
            eprintln!("Output stream closed.");
            Ok(T::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;

    const LINE_130: &str = " 0.000237 7  130        Rx D 5  00 F0 FC FF FF\n";
    const LINE_170: &str = " 0.000254 7  170        Rx D 8  00 00 00 00 00 00 00 00\n";

    fn config(sampling: &[(u32, u32)]) -> FilterConfig {
        FilterConfig {
            id_pos: 2,
            ids: vec![0x130, 0x120],
            sampling: sampling.iter().copied().collect(),
            input: None,
            output: None,
        }
    }

    fn run(config: &FilterConfig, input: &str) -> String {
        let mut out = Vec::new();
        FrameFilter::new(config)
            .run(input.as_bytes(), &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_filter_basic() {
        let input = format!("{}{}", LINE_130, LINE_170);
        assert_eq!(run(&config(&[]), &input), LINE_130);
    }

    #[test]
    fn test_filter_sampling_emits_every_period() {
        let input = LINE_130.repeat(2);
        assert_eq!(run(&config(&[(0x130, 2)]), &input), LINE_130);

        let input = LINE_130.repeat(7);
        assert_eq!(run(&config(&[(0x130, 3)]), &input), LINE_130.repeat(2));
    }

    #[test]
    fn test_filter_drops_headers_and_short_lines() {
        let input = format!("date Mon Oct 19\nbase hex\n{}\n", LINE_130);
        assert_eq!(run(&config(&[]), &input), LINE_130);
    }

    #[test]
    fn test_parse_id_token() {
        assert_eq!(parse_id_token("130"), Some(0x130));
        assert_eq!(parse_id_token("18FF50E5x"), Some(0x18FF_50E5));
        assert_eq!(parse_id_token("Rx"), None);
        assert_eq!(parse_id_token("x"), None);
    }

    /// Stream whose reader went away after `capacity` bytes
    struct ClosedAfter {
        capacity: usize,
        kind: io::ErrorKind,
    }

    impl Write for ClosedAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.capacity == 0 {
                return Err(io::Error::new(self.kind, "stream closed"));
            }
            let n = buf.len().min(self.capacity);
            self.capacity -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingInput;

    impl io::Read for FailingInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn test_closed_output_stream_ends_quietly() {
        let input = LINE_130.repeat(10_000);
        for kind in [io::ErrorKind::BrokenPipe, io::ErrorKind::InvalidData, io::ErrorKind::Other] {
            let output = ClosedAfter { capacity: 100, kind };
            let stats = FrameFilter::new(&config(&[]))
                .run_to_stream(input.as_bytes(), output)
                .unwrap();
            assert_eq!(stats, FilterStats::default());
        }
    }

    #[test]
    fn test_input_errors_are_not_hidden() {
        let err = FrameFilter::new(&config(&[]))
            .run_to_stream(BufReader::new(FailingInput), Vec::new())
            .unwrap_err();
        assert!(matches!(err, BmsError::IoError(_)));
    }

    #[test]
    fn test_file_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("trace.asc");
        std::fs::write(&input, format!("{}{}", LINE_170, LINE_130)).unwrap();

        let mut cfg = config(&[]);
        cfg.input = Some(input);
        cfg.output = Some(dir.path().join("nested").join("filtered.asc"));

        let stats = run_filter(&cfg).unwrap();
        assert_eq!(stats, FilterStats { lines_read: 2, lines_written: 1 });
        let written = std::fs::read_to_string(dir.path().join("nested/filtered.asc")).unwrap();
        assert_eq!(written, LINE_130);
    }
}
