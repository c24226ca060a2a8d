//! `log` subcommand: record raw bus traffic until Ctrl-C

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, tick};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bms_can::bus::{BusWorker, SystemBusOpener, WorkerOptions, WorkerStatus};
use bms_can::shell::{INIT_TIMEOUT, TEARDOWN_TIMEOUT};
use bms_can::{BmsError, BusConfig, RawFrame, RawLogConfig};

/// How often worker status is checked
const STATUS_INTERVAL: Duration = Duration::from_millis(250);

enum Event {
    Stop,
    Frame(RawFrame),
    Failed(BmsError),
    Idle,
}

/// Arguments of the `log` subcommand
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub directory: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
    pub interface: String,
    pub channel: String,
    pub bitrate: u32,
}

pub fn run(options: &LogOptions) -> Result<()> {
    let bus = BusConfig::new(&options.interface, &options.channel, options.bitrate)?;

    fs::create_dir_all(&options.directory)
        .map_err(|e| BmsError::io_at(&options.directory, e))
        .context("Could not create the log directory")?;
    let raw_log = RawLogConfig::new(&options.directory)
        .with_max_bytes(options.max_bytes)
        .with_backup_count(options.backups);
    let log_path = raw_log.path();

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Could not install the Ctrl-C handler")?;

    let worker_options = WorkerOptions::new(bus).with_raw_log(Some(raw_log));
    let worker = BusWorker::spawn(worker_options, Arc::new(SystemBusOpener::new()))?;
    if let Err(e) = worker.start_session(INIT_TIMEOUT) {
        if let Err(shutdown) = worker.shutdown(TEARDOWN_TIMEOUT) {
            log::warn!("{}", shutdown);
        }
        return Err(e.into());
    }
    println!("Logging to {} (Ctrl-C to stop)", log_path.display());

    let status_ticker = tick(STATUS_INTERVAL);
    let mut frames: u64 = 0;
    let result = loop {
        let event = select! {
            recv(stop_rx) -> _ => Event::Stop,
            recv(worker.inbound()) -> frame => match frame {
                Ok(frame) => Event::Frame(frame),
                Err(_) => Event::Failed(BmsError::AdapterOpError("Bus worker is gone".to_string())),
            },
            recv(status_ticker) -> _ => match session_error(&worker) {
                Some(e) => Event::Failed(e),
                None => Event::Idle,
            },
        };
        match event {
            Event::Stop => break Ok(()),
            Event::Failed(e) => break Err(e),
            Event::Frame(frame) => {
                frames += 1;
                log::trace!("{:X} {}", frame.arbitration_id, frame.data_hex());
            }
            Event::Idle => {}
        }
    };

    log::info!("Received {} frames", frames);
    finish(result, worker.shutdown(TEARDOWN_TIMEOUT))?;
    println!("Logging stopped.");
    Ok(())
}

/// Outcome of a run; a session error wins over a failed teardown
fn finish(
    session: std::result::Result<(), BmsError>,
    shutdown: std::result::Result<(), BmsError>,
) -> std::result::Result<(), BmsError> {
    match (session, shutdown) {
        (Err(e), Err(shutdown)) => {
            log::warn!("{}", shutdown);
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// First status telling that the session has ended
fn session_error(worker: &BusWorker) -> Option<BmsError> {
    while let Some(status) = worker.try_status() {
        match status {
            WorkerStatus::SessionStopped(reason) => return Some(BmsError::AdapterOpError(reason)),
            WorkerStatus::Stopped => {
                return Some(BmsError::AdapterOpError("Bus worker stopped".to_string()))
            }
            other => log::debug!("Worker status: {:?}", other),
        }
    }
    None
}
