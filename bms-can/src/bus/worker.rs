//! Bus I/O worker
//!
//! A dedicated thread owns the CAN adapter. The controller drives it with
//! [`Control`] messages and observes it through [`WorkerStatus`] messages;
//! frames flow through an inbound and an outbound queue.
//!
//! ```text
//!            Connect              Start
//!   Idle ─────────────> Paused ─────────────> Running
//!    ^                    │                      │
//!    └──── Cancel / init failure / error budget ─┘
//! ```
//!
//! While paused, received frames are read and discarded so driver buffers do
//! not fill up. While running, each iteration receives with a short poll
//! timeout, drains the outbound queue onto the bus and checks for control
//! messages.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::bus::asc::AscWriter;
use crate::bus::error_budget::{ErrorBudget, DEFAULT_THRESHOLD, DEFAULT_WINDOW};
use crate::bus::{now_seconds, BusOpener, CanBus};
use crate::config::{BusConfig, RawLogConfig};
use crate::types::{BmsError, RawFrame, Result};

/// Controller to worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Open the adapter and enter the paused state
    Connect,
    /// Start forwarding frames
    Start,
    /// Tear the session down and return to idle
    Cancel,
    /// Tear down and end the thread
    Shutdown,
}

/// Worker to controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Paused,
    Running,
    InitFailed(String),
    SessionStopped(String),
    Stopped,
}

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub bus: BusConfig,
    pub raw_log: Option<RawLogConfig>,
    pub error_threshold: usize,
    pub error_window: Duration,
    /// Receive timeout of one loop iteration
    pub poll_timeout: Duration,
    /// Wait for control messages while idle
    pub idle_interval: Duration,
}

impl WorkerOptions {
    pub fn new(bus: BusConfig) -> Self {
        Self {
            bus,
            raw_log: None,
            error_threshold: DEFAULT_THRESHOLD,
            error_window: DEFAULT_WINDOW,
            poll_timeout: Duration::from_millis(1),
            idle_interval: Duration::from_secs(1),
        }
    }

    pub fn with_raw_log(mut self, raw_log: Option<RawLogConfig>) -> Self {
        self.raw_log = raw_log;
        self
    }

    pub fn with_error_budget(mut self, threshold: usize, window: Duration) -> Self {
        self.error_threshold = threshold;
        self.error_window = window;
        self
    }
}

/// Controller-side handle of the worker thread
pub struct BusWorker {
    control: Sender<Control>,
    status: Receiver<WorkerStatus>,
    inbound: Receiver<RawFrame>,
    outbound: Sender<RawFrame>,
    thread: Option<JoinHandle<()>>,
}

impl BusWorker {
    /// Start the worker thread in the idle state
    pub fn spawn(options: WorkerOptions, opener: Arc<dyn BusOpener>) -> Result<Self> {
        let (control_tx, control_rx) = unbounded();
        let (status_tx, status_rx) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded();

        let worker = Worker {
            options,
            opener,
            control: control_rx,
            status: status_tx,
            inbound: inbound_tx,
            inbound_drain: inbound_rx.clone(),
            outbound: outbound_rx,
        };
        let thread = thread::Builder::new()
            .name("bms-bus-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| BmsError::AdapterInitError(format!("Could not start bus worker: {}", e)))?;

        Ok(Self {
            control: control_tx,
            status: status_rx,
            inbound: inbound_rx,
            outbound: outbound_tx,
            thread: Some(thread),
        })
    }

    /// Received frames
    pub fn inbound(&self) -> &Receiver<RawFrame> {
        &self.inbound
    }

    /// Frames to transmit; order is kept
    pub fn outbound(&self) -> &Sender<RawFrame> {
        &self.outbound
    }

    pub fn send(&self, control: Control) -> Result<()> {
        self.control
            .send(control)
            .map_err(|_| BmsError::AdapterOpError("Bus worker is not running".to_string()))
    }

    /// Next pending status message, if any
    pub fn try_status(&self) -> Option<WorkerStatus> {
        self.status.try_recv().ok()
    }

    fn wait_for(&self, deadline: Instant, wanted: &WorkerStatus) -> Result<()> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.status.recv_timeout(remaining) {
                Ok(status) if &status == wanted => return Ok(()),
                Ok(WorkerStatus::InitFailed(reason)) => {
                    return Err(BmsError::AdapterInitError(reason))
                }
                Ok(WorkerStatus::Stopped) => {
                    return Err(BmsError::AdapterInitError("Bus worker stopped".to_string()))
                }
                Ok(other) => log::debug!("Worker status while waiting: {:?}", other),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(BmsError::Timeout(
                        "CAN bus initialization did not finish in time.".to_string(),
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BmsError::AdapterInitError("Bus worker is gone".to_string()))
                }
            }
        }
    }

    /// Connect and start a session within `timeout`
    pub fn start_session(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for stale in self.status.try_iter() {
            log::debug!("Discarding earlier worker status {:?}", stale);
        }
        self.send(Control::Connect)?;
        let started = self
            .wait_for(deadline, &WorkerStatus::Paused)
            .and_then(|()| self.send(Control::Start))
            .and_then(|()| self.wait_for(deadline, &WorkerStatus::Running));
        if let Err(BmsError::Timeout(_)) = &started {
            // Leave the worker idle rather than half way through a start
            let _ = self.send(Control::Cancel);
        }
        started
    }

    /// Tear the session down, keeping the thread
    pub fn cancel_session(&self) -> Result<()> {
        self.send(Control::Cancel)
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and wait up to `timeout` for it to end
    ///
    /// A thread that does not end in time is detached.
    pub fn shutdown(mut self, timeout: Duration) -> Result<()> {
        let _ = self.control.send(Control::Shutdown);
        let deadline = Instant::now() + timeout;

        let result = match self.thread.take() {
            Some(thread) => {
                while !thread.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                if thread.is_finished() {
                    if thread.join().is_err() {
                        log::error!("Bus worker panicked");
                    }
                    Ok(())
                } else {
                    log::warn!("Bus worker did not stop within {:?}, detaching it", timeout);
                    Err(BmsError::Timeout("Bus worker did not stop in time.".to_string()))
                }
            }
            None => Ok(()),
        };

        let dropped = self.inbound.try_iter().count();
        if dropped > 0 {
            log::debug!("Dropped {} unread frames", dropped);
        }
        result
    }
}

impl Drop for BusWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.control.send(Control::Shutdown);
        }
    }
}

/// An open adapter with its logger and error budget
struct Session {
    bus: Box<dyn CanBus>,
    logger: Option<AscWriter>,
    budget: ErrorBudget,
}

enum Next {
    Idle,
    Paused(Session),
    Running(Session),
    Exit,
}

/// Thread side of the worker
struct Worker {
    options: WorkerOptions,
    opener: Arc<dyn BusOpener>,
    control: Receiver<Control>,
    status: Sender<WorkerStatus>,
    inbound: Sender<RawFrame>,
    inbound_drain: Receiver<RawFrame>,
    outbound: Receiver<RawFrame>,
}

impl Worker {
    fn report(&self, status: WorkerStatus) {
        log::debug!("Bus worker status: {:?}", status);
        let _ = self.status.send(status);
    }

    fn run(self) {
        log::debug!("Bus worker started");
        self.report(WorkerStatus::Idle);
        let mut state = Next::Idle;
        loop {
            state = match state {
                Next::Idle => self.idle(),
                Next::Paused(session) => self.paused(session),
                Next::Running(session) => self.running(session),
                Next::Exit => break,
            };
        }
        self.report(WorkerStatus::Stopped);
        log::debug!("Bus worker stopped");
    }

    fn idle(&self) -> Next {
        let control = self.control.recv_timeout(self.options.idle_interval);

        let discarded = self.outbound.try_iter().count();
        if discarded > 0 {
            log::debug!("Discarded {} frames queued without a session", discarded);
        }

        match control {
            Ok(Control::Connect) => match self.connect() {
                Ok(session) => {
                    self.report(WorkerStatus::Paused);
                    Next::Paused(session)
                }
                Err(e) => {
                    log::error!("{}", e);
                    let reason = match e {
                        BmsError::AdapterInitError(reason) => reason,
                        other => other.to_string(),
                    };
                    self.report(WorkerStatus::InitFailed(reason));
                    Next::Idle
                }
            },
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => Next::Exit,
            Ok(other) => {
                log::debug!("Ignoring {:?} while idle", other);
                Next::Idle
            }
            Err(RecvTimeoutError::Timeout) => Next::Idle,
        }
    }

    fn connect(&self) -> Result<Session> {
        let mut bus = self.opener.open(&self.options.bus).map_err(|e| match e {
            BmsError::AdapterInitError(_) => e,
            other => BmsError::AdapterInitError(other.to_string()),
        })?;
        let logger = match &self.options.raw_log {
            Some(config) => match AscWriter::create(config.clone()) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    bus.shutdown();
                    return Err(BmsError::AdapterInitError(format!(
                        "Could not start raw log: {}",
                        e
                    )));
                }
            },
            None => None,
        };
        Ok(Session {
            bus,
            logger,
            budget: ErrorBudget::new(self.options.error_threshold, self.options.error_window),
        })
    }

    /// Close the adapter and the logger and drain both queues
    fn teardown(&self, mut session: Session) {
        session.bus.shutdown();
        if let Some(logger) = session.logger.take() {
            if let Err(e) = logger.close() {
                log::warn!("Could not close raw log: {}", e);
            }
        }
        let unread = self.inbound_drain.try_iter().count();
        let unsent = self.outbound.try_iter().count();
        log::debug!(
            "Session closed ({} unread and {} unsent frames dropped)",
            unread,
            unsent
        );
    }

    /// Control message without blocking; `None` if there is none
    fn poll_control(&self) -> Option<Control> {
        match self.control.try_recv() {
            Ok(control) => Some(control),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Control::Shutdown),
        }
    }

    fn paused(&self, mut session: Session) -> Next {
        match self.poll_control() {
            Some(Control::Start) => {
                self.report(WorkerStatus::Running);
                return Next::Running(session);
            }
            Some(Control::Cancel) => {
                self.teardown(session);
                self.report(WorkerStatus::Idle);
                return Next::Idle;
            }
            Some(Control::Shutdown) => {
                self.teardown(session);
                return Next::Exit;
            }
            Some(Control::Connect) | None => {}
        }

        if let Err(e) = session.bus.recv(self.options.poll_timeout) {
            log::debug!("Receive failed while paused: {}", e);
            thread::sleep(self.options.poll_timeout);
        }
        Next::Paused(session)
    }

    /// Count an adapter error; tears the session down once the budget is spent
    fn count_error(&self, session: Session, error: BmsError) -> Next {
        let mut session = session;
        let exceeded = session.budget.record_now();
        log::warn!(
            "{} ({} of {} tolerated errors)",
            error,
            session.budget.count(),
            session.budget.threshold()
        );
        if !exceeded {
            return Next::Running(session);
        }
        let reason = format!(
            "Too many errors ({} within {} s). The CAN session is stopped.",
            session.budget.count(),
            self.options.error_window.as_secs()
        );
        log::error!("{}", reason);
        self.teardown(session);
        self.report(WorkerStatus::SessionStopped(reason));
        Next::Idle
    }

    fn running(&self, mut session: Session) -> Next {
        match session.bus.recv(self.options.poll_timeout) {
            Ok(Some(frame)) => {
                if let Some(logger) = session.logger.as_mut() {
                    if let Err(e) = logger.log(&frame) {
                        log::warn!("Could not write raw log: {}", e);
                    }
                }
                let _ = self.inbound.send(frame);
            }
            Ok(None) => {}
            Err(e) => {
                // Keep a failing adapter from spinning
                thread::sleep(self.options.poll_timeout);
                return self.count_error(session, e);
            }
        }

        while let Ok(mut frame) = self.outbound.try_recv() {
            match session.bus.send(&frame) {
                Ok(()) => {
                    frame.is_rx = false;
                    frame.timestamp = now_seconds();
                    if let Some(logger) = session.logger.as_mut() {
                        if let Err(e) = logger.log(&frame) {
                            log::warn!("Could not write raw log: {}", e);
                        }
                    }
                }
                Err(e) => match self.count_error(session, e) {
                    Next::Running(s) => session = s,
                    other => return other,
                },
            }
        }

        match self.poll_control() {
            Some(Control::Cancel) => {
                self.teardown(session);
                self.report(WorkerStatus::Idle);
                Next::Idle
            }
            Some(Control::Shutdown) => {
                self.teardown(session);
                Next::Exit
            }
            Some(other) => {
                log::debug!("Ignoring {:?} while running", other);
                Next::Running(session)
            }
            None => Next::Running(session),
        }
    }
}
