//! Shell output
//!
//! Status goes to stdout, errors to stderr. Both streams sit behind one
//! lock so lines written from different places never interleave.

use std::io::{self, Write};
use std::sync::Arc;

use colored::Colorize;
use parking_lot::Mutex;

struct Streams {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    color: bool,
}

/// Cloneable handle to the shell's output streams
#[derive(Clone)]
pub struct Console {
    streams: Arc<Mutex<Streams>>,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            streams: Arc::new(Mutex::new(Streams { out, err, color })),
        }
    }

    /// Console on the process stdout/stderr
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()), true)
    }

    /// Console writing into memory, without colors
    pub fn capture() -> (Self, Capture) {
        let capture = Capture::default();
        let console = Self::new(
            Box::new(capture.out.clone()),
            Box::new(capture.err.clone()),
            false,
        );
        (console, capture)
    }

    pub fn println(&self, text: &str) {
        let mut streams = self.streams.lock();
        let _ = writeln!(streams.out, "{}", text);
        let _ = streams.out.flush();
    }

    pub fn eprintln(&self, text: &str) {
        let mut streams = self.streams.lock();
        let _ = writeln!(streams.err, "{}", text);
        let _ = streams.err.flush();
    }

    /// Success line on stdout, green on a terminal
    pub fn success(&self, text: &str) {
        let mut streams = self.streams.lock();
        let line = if streams.color {
            text.green().to_string()
        } else {
            text.to_string()
        };
        let _ = writeln!(streams.out, "{}", line);
        let _ = streams.out.flush();
    }
}

/// In-memory byte sink
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Output captured by [`Console::capture`]
#[derive(Clone, Default)]
pub struct Capture {
    pub out: SharedBuffer,
    pub err: SharedBuffer,
}

impl Capture {
    pub fn stdout(&self) -> String {
        self.out.contents()
    }

    pub fn stderr(&self) -> String {
        self.err.contents()
    }

    pub fn clear(&self) {
        self.out.clear();
        self.err.clear();
    }
}
