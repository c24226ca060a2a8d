//! Request shell
//!
//! [`Controller`] is the state machine behind the interactive `bms` shell.
//! It owns the bus worker, queues debug requests, tracks the pending log
//! subscription and renders matching inbound frames. Input lines are fed to
//! [`Controller::handle_line`]; [`Controller::tick`] must be called
//! periodically to move frames and observe the worker.

pub mod command;
pub mod console;
pub mod debug;
pub mod monitor;
pub mod pacing;
pub mod subscription;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::bus::{BusOpener, BusWorker, WorkerOptions, WorkerStatus};
use crate::codec::Codec;
use crate::config::{BusConfig, RawLogConfig, ShellConfig};
use crate::types::{FieldMap, RawFrame, Result};

pub use command::{parse_command, Command, CommandError, LogArg, Query};
pub use console::{Capture, Console};
pub use debug::{DebugQueue, DebugRequest};
pub use monitor::Monitor;
pub use pacing::Pacer;
pub use subscription::{Delivery, LogSubscription};

pub const NOT_INITIALIZED: &str = "BMS interface is not initialized. Enter INIT first.";

/// Wait for the worker to report a running session
pub const INIT_TIMEOUT: Duration = Duration::from_secs(3);
/// Wait for the worker thread to end
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause before teardown so queued requests reach the bus
pub const EXIT_DELAY: Duration = Duration::from_millis(500);

/// What the input loop does after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

struct StateRequest {
    message: String,
    fields: FieldMap,
}

/// Request shell state machine
pub struct Controller {
    codec: Codec,
    bus: BusConfig,
    raw_log: Option<RawLogConfig>,
    opener: Arc<dyn BusOpener>,
    console: Console,
    worker: Option<BusWorker>,
    debug: DebugQueue,
    subscription: LogSubscription,
    last_activity: Instant,
    subscription_timeout: Duration,
    monitor: Monitor,
    state_request: Option<StateRequest>,
    pacer: Pacer,
    exit_delay: Duration,
}

impl Controller {
    pub fn new(
        codec: Codec,
        bus: BusConfig,
        opener: Arc<dyn BusOpener>,
        console: Console,
    ) -> Result<Self> {
        let debug = DebugQueue::new(codec.clone())?;
        Ok(Self {
            codec,
            bus,
            raw_log: None,
            opener,
            console,
            worker: None,
            debug,
            subscription: LogSubscription::INACTIVE,
            last_activity: Instant::now(),
            subscription_timeout: Duration::from_secs(10),
            monitor: Monitor::new(),
            state_request: None,
            pacer: Pacer::default(),
            exit_delay: EXIT_DELAY,
        })
    }

    /// Build a controller from `bms.yml`
    pub fn from_config(config: &ShellConfig, opener: Arc<dyn BusOpener>, console: Console) -> Result<Self> {
        log::info!("Loading DBC file: {:?}", config.dbc);
        let codec = Codec::load(&config.dbc)?;
        let mut controller = Self::new(codec, config.bus.clone(), opener, console)?
            .with_raw_log(config.raw_log.clone())
            .with_subscription_timeout(config.subscription_timeout);
        if let Some(path) = &config.stream {
            controller = controller.with_stream(path)?;
        }
        if let Some(request) = &config.state_request {
            controller = controller.with_state_request(&request.message, request.field_map())?;
        }
        Ok(controller)
    }

    pub fn with_raw_log(mut self, raw_log: Option<RawLogConfig>) -> Self {
        self.raw_log = raw_log;
        self
    }

    /// Zero disables the timeout
    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    pub fn with_stream(mut self, path: &Path) -> Result<Self> {
        self.monitor = Monitor::new().with_stream(path)?;
        Ok(self)
    }

    /// Send `message` with `fields` periodically while connected
    ///
    /// The request is encoded once here so configuration errors show up early.
    pub fn with_state_request(mut self, message: &str, fields: FieldMap) -> Result<Self> {
        self.codec.encode(message, &fields, true)?;
        self.state_request = Some(StateRequest {
            message: message.to_string(),
            fields,
        });
        Ok(self)
    }

    pub fn with_exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    pub fn subscription(&self) -> LogSubscription {
        self.subscription
    }

    pub fn pending_requests(&self) -> usize {
        self.debug.len()
    }

    /// Handle one input line
    pub fn handle_line(&mut self, line: &str) -> Flow {
        let flow = match parse_command(line) {
            Ok(command) if command.needs_session() && !self.is_initialized() => {
                self.console.eprintln(NOT_INITIALIZED);
                Flow::Continue
            }
            Ok(command) => self.execute(command),
            Err(CommandError::Empty) => Flow::Continue,
            // `log` needs a session however its arguments parse
            Err(CommandError::LogUsage(_)) if !self.is_initialized() => {
                self.console.eprintln(NOT_INITIALIZED);
                Flow::Continue
            }
            Err(e @ CommandError::LogUsage(_)) => {
                self.console.eprintln(&e.to_string());
                self.subscription.clear();
                Flow::Continue
            }
            Err(e) => {
                self.console.eprintln(&e.to_string());
                Flow::Continue
            }
        };
        self.flush_debug();
        flow
    }

    fn execute(&mut self, command: Command) -> Flow {
        log::debug!("Executing {:?}", command);
        match command {
            Command::Init => self.init(),
            Command::Fram => self.debug.reinitialize_fram(),
            Command::Rtc => {
                self.debug.set_rtc(&Local::now().naive_local());
                self.subscribe(debug::RESPONSE_ID, 1, false);
            }
            Command::Query(query) => {
                let (request, response_id, frames) = DebugRequest::for_query(query);
                self.debug.push(request);
                self.subscribe(response_id, frames, false);
            }
            Command::SoftwareReset => self.debug.software_reset(),
            Command::Log(LogArg::Subscribe { msg_id, count }) => self.subscribe(msg_id, count, true),
            Command::Log(LogArg::Stop) => self.stop_logging(),
            Command::Exit => {
                if !self.is_initialized() {
                    return Flow::Quit;
                }
                self.teardown(self.exit_delay);
                self.console.println("BMS interface disconnected.");
            }
            Command::Help => self.console.println(command::HELP),
            Command::Status => self.print_status(),
        }
        Flow::Continue
    }

    fn init(&mut self) {
        if self.is_initialized() {
            self.console.eprintln("BMS interface is already initialized.");
            return;
        }
        let options = WorkerOptions::new(self.bus.clone()).with_raw_log(self.raw_log.clone());
        let worker = match BusWorker::spawn(options, Arc::clone(&self.opener)) {
            Ok(worker) => worker,
            Err(e) => {
                self.console.eprintln(&e.to_string());
                return;
            }
        };
        match worker.start_session(INIT_TIMEOUT) {
            Ok(()) => {
                self.monitor.reset();
                self.pacer.reset();
                self.worker = Some(worker);
                self.console.println("BMS interface initialized.");
            }
            Err(e) => {
                self.console.eprintln(&e.to_string());
                if let Err(e) = worker.shutdown(TEARDOWN_TIMEOUT) {
                    log::warn!("{}", e);
                }
            }
        }
    }

    fn subscribe(&mut self, msg_id: u32, count: u32, announce: bool) {
        if self.subscription.is_active() {
            self.console.eprintln(&format!(
                "Waiting for message with ID {} has been stopped.",
                self.subscription.msg_id
            ));
        }
        self.subscription = LogSubscription::new(msg_id, count);
        self.last_activity = Instant::now();
        if announce {
            self.console.println(&format!(
                "Waiting for message with ID {}.\nTo stop logging enter LOG STOP",
                msg_id
            ));
        }
    }

    fn stop_logging(&mut self) {
        if self.subscription.is_active() {
            self.console.eprintln(&format!(
                "Waiting for message with ID {} has been stopped.",
                self.subscription.msg_id
            ));
            self.subscription.clear();
        } else {
            self.console.println("No message is being logged.");
        }
    }

    fn print_status(&self) {
        let session = if self.is_initialized() {
            format!("connected ({} channel {})", self.bus.interface, self.bus.channel)
        } else {
            "not initialized".to_string()
        };
        self.console.println(&format!(
            "Session: {}\nLogging: {}\nPending requests: {}",
            session,
            self.subscription,
            self.debug.len()
        ));
    }

    fn flush_debug(&mut self) {
        let Some(worker) = &self.worker else {
            return;
        };
        if let Err(e) = self.debug.flush(worker.outbound()) {
            log::warn!("{}", e);
        }
    }

    /// Stop the worker and return to the uninitialized state
    ///
    /// `delay` gives queued frames time to reach the bus.
    fn teardown(&mut self, delay: Duration) {
        self.flush_debug();
        if let Some(worker) = self.worker.take() {
            thread::sleep(delay);
            if let Err(e) = worker.shutdown(TEARDOWN_TIMEOUT) {
                self.console.eprintln(&e.to_string());
            }
        }
        self.debug.clear();
        self.subscription.clear();
        self.monitor.flush();
    }

    /// Tear down any session; used when the shell ends
    pub fn shutdown(&mut self) {
        if self.is_initialized() {
            self.teardown(self.exit_delay);
        }
    }

    /// Observe the worker, send queued and periodic requests, render frames
    pub fn tick(&mut self) {
        let Some(worker) = &self.worker else {
            return;
        };

        let statuses: Vec<WorkerStatus> = std::iter::from_fn(|| worker.try_status()).collect();
        for status in statuses {
            match status {
                WorkerStatus::SessionStopped(reason) | WorkerStatus::InitFailed(reason) => {
                    self.console.eprintln(&reason);
                    self.teardown(Duration::ZERO);
                    return;
                }
                WorkerStatus::Stopped => {
                    self.console.eprintln("CAN bus worker stopped.");
                    self.teardown(Duration::ZERO);
                    return;
                }
                other => log::debug!("Worker status: {:?}", other),
            }
        }

        self.flush_debug();
        self.send_state_request();
        self.process_inbound();
        self.check_timeout();
    }

    fn send_state_request(&mut self) {
        let (Some(request), Some(worker)) = (&self.state_request, &self.worker) else {
            return;
        };
        if !self.pacer.try_emit(Instant::now()) {
            return;
        }
        match self.codec.encode_frame(&request.message, &request.fields) {
            Ok(frame) => {
                let _ = worker.outbound().send(frame);
            }
            Err(e) => log::info!("State request not sent: {}", e),
        }
    }

    fn process_inbound(&mut self) {
        let frames: Vec<RawFrame> = match &self.worker {
            Some(worker) => worker.inbound().try_iter().collect(),
            None => return,
        };
        for mut frame in frames {
            self.monitor.observe(&self.codec, &mut frame);
            self.render(&frame);
        }
    }

    /// Print a frame matching the subscription
    fn render(&mut self, frame: &RawFrame) {
        if !self.subscription.matches(frame.arbitration_id) {
            return;
        }
        match self.codec.decode(frame.arbitration_id, &frame.data) {
            Ok(decoded) => self.console.println(&format!(
                "Message ID {}: {}",
                frame.arbitration_id,
                decoded.fields()
            )),
            Err(e) => {
                log::info!("{}", e);
                return;
            }
        }
        self.last_activity = Instant::now();
        if let Delivery::Completed(msg_id) = self.subscription.deliver() {
            self.console.success(&format!(
                "All messages with ID {} have been printed.",
                msg_id
            ));
        }
    }

    fn check_timeout(&mut self) {
        if self.subscription_timeout.is_zero() || !self.subscription.is_active() {
            return;
        }
        if self.last_activity.elapsed() >= self.subscription_timeout {
            self.console.eprintln(&format!(
                "Timeout while waiting for message with ID {}.",
                self.subscription.msg_id
            ));
            self.subscription.clear();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.shutdown(TEARDOWN_TIMEOUT) {
                log::warn!("{}", e);
            }
        }
    }
}
