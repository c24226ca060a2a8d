//! Request shell and bus worker against the virtual bus

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use crossbeam_channel::unbounded;

use bms_can::bus::{
    BusOpener, BusWorker, CanBus, SystemBusOpener, VirtualNetwork, WorkerOptions, WorkerStatus,
};
use bms_can::shell::{Capture, Console, Controller, DebugQueue, Flow, LogSubscription};
use bms_can::{BmsError, BusConfig, Codec, FieldMap, RawFrame, RawLogConfig, Result, SignalValue};

fn codec() -> Codec {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/bms.dbc");
    Codec::load(&path).unwrap()
}

fn bus(channel: &str) -> BusConfig {
    BusConfig::new("virtual", channel, 500_000).unwrap()
}

fn controller(channel: &str, opener: Arc<dyn BusOpener>) -> (Controller, Capture) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (console, capture) = Console::capture();
    let controller = Controller::new(codec(), bus(channel), opener, console)
        .unwrap()
        .with_exit_delay(Duration::ZERO);
    (controller, capture)
}

fn tick_until(controller: &mut Controller, done: impl Fn(&Controller) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        controller.tick();
        if done(controller) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_fram_request_frame() {
    let (tx, rx) = unbounded();
    let mut queue = DebugQueue::new(codec()).unwrap();
    queue.reinitialize_fram();
    assert_eq!(queue.flush(&tx).unwrap(), 1);

    let frame = rx.try_recv().unwrap();
    assert_eq!(frame.arbitration_id, 768);
    assert_eq!(frame.data, vec![0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(frame.timestamp, 0.0);
    assert!(queue.is_empty());
}

#[test]
fn test_software_reset_frame() {
    let (tx, rx) = unbounded();
    let mut queue = DebugQueue::new(codec()).unwrap();
    queue.software_reset();
    queue.flush(&tx).unwrap();

    let frame = rx.try_recv().unwrap();
    assert_eq!(frame.arbitration_id, 768);
    assert_eq!(frame.data, vec![0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn test_requests_keep_their_order() {
    let (tx, rx) = unbounded();
    let mut queue = DebugQueue::new(codec()).unwrap();
    queue.software_reset();
    queue.reinitialize_fram();
    queue.software_reset();
    assert_eq!(queue.flush(&tx).unwrap(), 3);

    let selectors: Vec<u8> = rx.try_iter().map(|f| f.data[0]).collect();
    assert_eq!(selectors, vec![0x02, 0x03, 0x02]);
}

#[test]
fn test_rtc_frame_decodes_to_date() {
    let codec = codec();
    let (tx, rx) = unbounded();
    let mut queue = DebugQueue::new(codec.clone()).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_micro_opt(13, 45, 30, 250_000)
        .unwrap();
    queue.set_rtc(&date);
    queue.flush(&tx).unwrap();

    let frame = rx.try_recv().unwrap();
    let decoded = codec.decode(frame.arbitration_id, &frame.data).unwrap();
    let fields = decoded.fields();
    let expect = [
        ("f_Debug_Rtc_SetHundredthOfSeconds", 25),
        ("f_Debug_Rtc_SetSeconds", 30),
        ("f_Debug_Rtc_SetMinutes", 45),
        ("f_Debug_Rtc_SetHours", 13),
        ("f_Debug_Rtc_SetWeekday", 5),
        ("f_Debug_Rtc_SetDay", 17),
        ("f_Debug_Rtc_SetMonth", 5),
        ("f_Debug_Rtc_SetYear", 24),
    ];
    for (name, value) in expect {
        assert_eq!(fields.get(name), Some(&SignalValue::Integer(value)), "{}", name);
    }
}

#[test]
fn test_commands_need_init() {
    let (mut controller, capture) = controller("shell-no-init", Arc::new(SystemBusOpener::new()));
    assert_eq!(controller.handle_line("fram"), Flow::Continue);
    assert_eq!(
        capture.stderr(),
        "BMS interface is not initialized. Enter INIT first.\n"
    );
    assert_eq!(controller.pending_requests(), 0);

    // Malformed `log` arguments still ask for INIT first
    capture.clear();
    controller.handle_line("log 12G");
    assert_eq!(
        capture.stderr(),
        "BMS interface is not initialized. Enter INIT first.\n"
    );

    capture.clear();
    controller.handle_line("frobnicate now");
    assert_eq!(capture.stderr(), "Invalid command: frobnicate now\n");

    assert_eq!(controller.handle_line("EXIT"), Flow::Quit);
}

#[test]
fn test_log_subscription_commands() {
    let network = VirtualNetwork::new();
    let opener = Arc::new(SystemBusOpener::with_network(network.clone()));
    let (mut controller, capture) = controller("shell-log", opener);

    controller.handle_line("init");
    assert!(controller.is_initialized());
    assert_eq!(capture.stdout(), "BMS interface initialized.\n");
    capture.clear();

    controller.handle_line("log 300h");
    assert_eq!(controller.subscription(), LogSubscription::new(0x300, 1));
    assert_eq!(
        capture.stdout(),
        "Waiting for message with ID 768.\nTo stop logging enter LOG STOP\n"
    );

    controller.handle_line("log stop");
    assert_eq!(controller.subscription(), LogSubscription::INACTIVE);
    assert_eq!(
        capture.stderr(),
        "Waiting for message with ID 768 has been stopped.\n"
    );

    capture.clear();
    controller.handle_line("log 0x12C 3");
    assert_eq!(controller.subscription(), LogSubscription::new(300, 3));
    controller.handle_line("log 12G");
    assert_eq!(controller.subscription(), LogSubscription::INACTIVE);
    assert!(!capture.stderr().is_empty());

    controller.handle_line("exit");
    assert!(!controller.is_initialized());
    assert!(capture.stdout().ends_with("BMS interface disconnected.\n"));
    assert_eq!(network.members("shell-log"), 0);
}

#[test]
fn test_query_prints_response() {
    let network = VirtualNetwork::new();
    let opener = Arc::new(SystemBusOpener::with_network(network.clone()));
    let (mut controller, capture) = controller("shell-uptime", opener);
    let mut bms = network.attach("shell-uptime");

    controller.handle_line("init");
    controller.handle_line("uptime");
    assert_eq!(controller.subscription(), LogSubscription::new(769, 1));

    let request = bms.recv(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(request.arbitration_id, 768);
    assert_eq!(request.data[0], 0x05);

    bms.send(&RawFrame::new(769, vec![0x05, 0x00, 0x00, 0x00, 0x2A, 0xFF, 0xFF, 0xFF]))
        .unwrap();
    assert!(tick_until(&mut controller, |c| !c.subscription().is_active()));

    let stdout = capture.stdout();
    assert!(stdout.contains("Message ID 769: {"), "{}", stdout);
    assert!(stdout.contains("'f_DebugResponse_Uptime_Seconds': 42"), "{}", stdout);
    assert!(stdout.ends_with("All messages with ID 769 have been printed.\n"));

    controller.handle_line("exit");
}

#[test]
fn test_new_subscription_replaces_pending_one() {
    let network = VirtualNetwork::new();
    let opener = Arc::new(SystemBusOpener::with_network(network));
    let (mut controller, capture) = controller("shell-replace", opener);

    controller.handle_line("init");
    controller.handle_line("commithash");
    assert_eq!(controller.subscription(), LogSubscription::new(769, 2));
    controller.handle_line("buildconfig");
    assert_eq!(controller.subscription(), LogSubscription::new(771, 19));
    assert_eq!(
        capture.stderr(),
        "Waiting for message with ID 769 has been stopped.\n"
    );
    controller.handle_line("exit");
}

#[test]
fn test_subscription_timeout() {
    let opener = Arc::new(SystemBusOpener::with_network(VirtualNetwork::new()));
    let (console, capture) = Console::capture();
    let mut controller = Controller::new(codec(), bus("shell-timeout"), opener, console)
        .unwrap()
        .with_exit_delay(Duration::ZERO)
        .with_subscription_timeout(Duration::from_millis(50));

    controller.handle_line("init");
    controller.handle_line("log 301h");
    assert!(tick_until(&mut controller, |c| !c.subscription().is_active()));
    assert!(capture
        .stderr()
        .contains("Timeout while waiting for message with ID 769."));
    controller.handle_line("exit");
}

#[test]
fn test_state_request_is_paced() {
    let network = VirtualNetwork::new();
    let opener = Arc::new(SystemBusOpener::with_network(network.clone()));
    let (controller, _capture) = controller("shell-state", opener);
    let fields = FieldMap::new()
        .with("f_BmsStateRequest_Request", "Normal")
        .with("f_BmsStateRequest_Counter", 0);
    let mut controller = controller
        .with_state_request("f_BmsStateRequest", fields)
        .unwrap();
    let mut bms = network.attach("shell-state");

    // Nothing is sent before INIT
    controller.tick();
    assert!(bms.recv(Duration::from_millis(20)).unwrap().is_none());

    controller.handle_line("init");
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(550) {
        controller.tick();
        std::thread::sleep(Duration::from_millis(2));
    }
    controller.handle_line("exit");

    let mut stamps = Vec::new();
    while let Some(frame) = bms.recv(Duration::from_millis(50)).unwrap() {
        assert_eq!(frame.arbitration_id, 528);
        assert_eq!(frame.data, vec![0xBF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        stamps.push(frame.timestamp);
    }
    assert!((4..=7).contains(&stamps.len()), "{} requests", stamps.len());
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] > 0.05, "requests {:?} too close", pair);
    }
}

#[test]
fn test_decoded_message_stream() {
    let dir = tempfile::tempdir().unwrap();
    let stream = dir.path().join("stream").join("decoded.json");
    let network = VirtualNetwork::new();
    let opener = Arc::new(SystemBusOpener::with_network(network.clone()));
    let (controller, _capture) = controller("shell-stream", opener);
    let mut controller = controller.with_stream(&stream).unwrap();
    let mut bms = network.attach("shell-stream");

    controller.handle_line("init");
    controller.handle_line("log 0x35C 2");
    bms.send(&RawFrame::new(0x35C, vec![0x00, 0x04, 0xFF, 0xFF, 0xF4, 0xA4]))
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    // Unknown ids are not streamed
    bms.send(&RawFrame::new(0x7FF, vec![0x01])).unwrap();
    bms.send(&RawFrame::new(0x35C, vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x2A]))
        .unwrap();
    assert!(tick_until(&mut controller, |c| !c.subscription().is_active()));
    controller.handle_line("exit");

    let text = fs::read_to_string(&stream).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2, "{}", text);
    assert_eq!(
        lines[0],
        "{\"Timestamp\": 0.000000,\"0x35C_CurrentSensor_SIG_Current_mA\":-2908}"
    );
    assert!(lines[1].ends_with(",\"0x35C_CurrentSensor_SIG_Current_mA\":42}"));
    assert!(!lines[1].starts_with("{\"Timestamp\": 0.000000"));
}

#[test]
fn test_raw_log_records_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let network = VirtualNetwork::new();
    let opener = Arc::new(SystemBusOpener::with_network(network.clone()));
    let options =
        WorkerOptions::new(bus("raw-log")).with_raw_log(Some(RawLogConfig::new(dir.path())));
    let worker = BusWorker::spawn(options, opener).unwrap();
    worker.start_session(Duration::from_secs(3)).unwrap();
    let mut bms = network.attach("raw-log");

    bms.send(&RawFrame::new(0x35C, vec![0x00, 0x04, 0xFF, 0xFF, 0xF4, 0xA4]))
        .unwrap();
    worker.inbound().recv_timeout(Duration::from_secs(1)).unwrap();
    worker
        .outbound()
        .send(RawFrame::new(0x300, vec![0x03, 0xFF]))
        .unwrap();
    bms.recv(Duration::from_secs(1)).unwrap().unwrap();
    worker.shutdown(Duration::from_secs(2)).unwrap();

    let text = fs::read_to_string(dir.path().join("foxbms.asc")).unwrap();
    assert!(text.starts_with("date "));
    assert!(text.ends_with("End TriggerBlock\n"));

    let frames: Vec<Vec<&str>> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| matches!(tokens.get(3), Some(&"Rx") | Some(&"Tx")))
        .collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[0],
        vec!["0.000000", "1", "35C", "Rx", "d", "6", "00", "04", "FF", "FF", "F4", "A4"]
    );
    assert_eq!(&frames[1][1..], &["1", "300", "Tx", "d", "2", "03", "FF"]);
}

/// Adapter whose every receive fails
struct BrokenBus;

impl CanBus for BrokenBus {
    fn recv(&mut self, _timeout: Duration) -> Result<Option<RawFrame>> {
        Err(BmsError::AdapterOpError("bus off".to_string()))
    }

    fn send(&mut self, _frame: &RawFrame) -> Result<()> {
        Err(BmsError::AdapterOpError("bus off".to_string()))
    }
}

struct BrokenOpener;

impl BusOpener for BrokenOpener {
    fn open(&self, _config: &BusConfig) -> Result<Box<dyn CanBus>> {
        Ok(Box::new(BrokenBus))
    }
}

#[test]
fn test_error_budget_stops_session() {
    let options = WorkerOptions::new(bus("budget")).with_error_budget(3, Duration::from_secs(3600));
    let worker = BusWorker::spawn(options, Arc::new(BrokenOpener)).unwrap();
    worker.start_session(Duration::from_secs(3)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut stopped = None;
    while stopped.is_none() && Instant::now() < deadline {
        match worker.try_status() {
            Some(WorkerStatus::SessionStopped(reason)) => stopped = Some(reason),
            Some(_) => {}
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    let reason = stopped.unwrap();
    assert!(reason.starts_with("Too many errors"), "{}", reason);
    assert!(worker.is_alive());

    let started = Instant::now();
    worker.shutdown(Duration::from_secs(2)).unwrap();
    assert!(started.elapsed() < Duration::from_millis(2500));
}

#[test]
fn test_shell_returns_to_uninitialized_after_bus_errors() {
    let (mut controller, capture) = controller("shell-broken", Arc::new(BrokenOpener));
    controller.handle_line("init");
    assert!(controller.is_initialized());

    assert!(tick_until(&mut controller, |c| !c.is_initialized()));
    assert!(capture.stderr().contains("Too many errors"));
    assert_eq!(controller.handle_line("fram"), Flow::Continue);
    assert!(capture.stderr().ends_with("BMS interface is not initialized. Enter INIT first.\n"));
}
