//! Trace pipeline: filter, decode and table output over real files

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use bms_can::decoder::RecordSink;
use bms_can::table::run_table;
use bms_can::{run_decoder, DecoderConfig, FilterConfig, FrameDecoder, FrameFilter, TableConfig};

fn fixture_dbc() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/bms.dbc")
}

fn decoder_config(output: Option<&std::path::Path>) -> DecoderConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut yaml = format!(
        "dbc: {:?}\ntimestamp_pos: 0\nid_pos: 2\ndata_pos: 6\n",
        fixture_dbc()
    );
    if let Some(dir) = output {
        yaml.push_str(&format!("output: {:?}\n", dir));
    }
    DecoderConfig::from_yaml_str(&yaml).unwrap()
}

fn run_filter_on(config: &str, input: &str) -> String {
    let config = FilterConfig::from_yaml_str(config).unwrap();
    let mut filter = FrameFilter::new(&config);
    let mut output = Vec::new();
    filter.run(Cursor::new(input), &mut output).unwrap();
    String::from_utf8(output).unwrap()
}

#[test]
fn test_filter_keeps_allowed_ids() {
    let input = " 0.000237 7  130        Rx D 5  00 F0 FC FF FF\n 0.000421 7  170        Rx D 5  00 F0 FC FF FF\n";
    let output = run_filter_on("id_pos: 2\nids: [\"130\", \"120\"]\n", input);
    assert_eq!(output, " 0.000237 7  130        Rx D 5  00 F0 FC FF FF\n");
}

#[test]
fn test_filter_sampling_keeps_second_frame() {
    let input = " 0.000237 7  130        Rx D 5  00 F0 FC FF FF\n 0.000511 7  130        Rx D 5  00 F0 FC FF 00\n";
    let output = run_filter_on(
        "id_pos: 2\nids: [\"130\", \"120\"]\nsampling:\n  \"130\": 2\n",
        input,
    );
    assert_eq!(output, " 0.000511 7  130        Rx D 5  00 F0 FC FF 00\n");
}

#[test]
fn test_decode_current_sensor_line() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("decoded");
    let config = decoder_config(Some(&out));
    let decoder = FrameDecoder::from_config(&config).unwrap();

    let input = "925.201998 8  35C        Rx D 6  00  04  FF  FF  F4  A4\n";
    let mut sink = RecordSink::directory(&out).unwrap();
    let stats = decoder.decode_stream(Cursor::new(input), &mut sink).unwrap();
    drop(sink);

    assert_eq!(stats.records_written, 1);
    let text = fs::read_to_string(out.join("CurrentSensor_Current.json")).unwrap();
    assert_eq!(
        text,
        "{\"Timestamp\": 925.201998,\"860_CurrentSensor_SIG_Current_mA\":-2908}\n"
    );
}

#[test]
fn test_run_decoder_from_trace_file() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace.asc");
    fs::write(
        &trace,
        "date Mon Jan 1 12:00:00 2024\n\
         \x20  0.100000 1  301             Rx   d 8 05 00 00 00 2A FF FF FF\n\
         \x20  0.200000 1  35C             Rx   d 6 00 04 FF FF F4 A4\n\
         \x20  0.300000 1  301             Rx   d 8 00 01 02 03 FF FF FF FF\n",
    )
    .unwrap();
    let out = dir.path().join("decoded");
    let mut config = decoder_config(Some(&out));
    config.input = Some(trace);

    let stats = run_decoder(&config).unwrap();
    assert_eq!(stats.lines_read, 4);
    assert_eq!(stats.records_written, 3);
    assert_eq!(stats.lines_skipped, 1);

    let uptime = fs::read_to_string(out.join("f_DebugResponse_Mux_5.json")).unwrap();
    assert_eq!(
        uptime,
        "{\"Timestamp\": 0.100000,\"769_f_DebugResponse_Uptime_Seconds_s\":42}\n"
    );
    let version = fs::read_to_string(out.join("f_DebugResponse_Mux_0.json")).unwrap();
    assert!(version.starts_with("{\"Timestamp\": 0.300000,"), "{}", version);
    assert!(out.join("CurrentSensor_Current.json").exists());

    // A missing trace is an IO error naming the file
    config.input = Some(dir.path().join("missing.asc"));
    let err = run_decoder(&config).unwrap_err();
    assert!(err.to_string().contains("missing.asc"), "{}", err);
}

#[test]
fn test_decode_skips_bad_lines() {
    let config = decoder_config(None);
    let decoder = FrameDecoder::from_config(&config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut sink = RecordSink::directory(dir.path()).unwrap();

    let input = "date Mon Jan 1 12:00:00 2024\n\
                 1.000000 1  7FF             Rx   d 2 00 00\n\
                 1.100000 1  35C             Rx   d 2 00 00\n\
                 1.200000 1  35C             Rx   d 6 00 00 00 00 00 2A\n";
    let stats = decoder.decode_stream(Cursor::new(input), &mut sink).unwrap();
    assert_eq!(stats.lines_read, 4);
    assert_eq!(stats.records_written, 1);
    assert_eq!(stats.lines_skipped, 3);
}

#[test]
fn test_trace_to_joined_csv() {
    let dir = tempfile::tempdir().unwrap();
    let decoded = dir.path().join("decoded");
    let config = decoder_config(Some(&decoded));
    let decoder = FrameDecoder::from_config(&config).unwrap();

    let trace = "   0.100000 1  35C             Rx   d 6 00 00 00 00 00 64\n\
                 \x20  0.150000 1  210             Rx   d 8 40 05 FF FF FF FF FF FF\n\
                 \x20  0.200000 1  35C             Rx   d 6 00 00 00 00 00 C8\n";
    let mut sink = RecordSink::directory(&decoded).unwrap();
    let stats = decoder.decode_stream(Cursor::new(trace), &mut sink).unwrap();
    drop(sink);
    assert_eq!(stats.records_written, 3);

    let table_config = TableConfig::from_yaml_str(
        "start_date: \"2024-03-01T08:00:00\"\njoin_on: \"860_CurrentSensor_SIG_Current_mA\"\n",
    )
    .unwrap();
    let output = dir.path().join("joined.csv");
    let written = run_table(&decoded, &table_config, &output).unwrap();
    assert_eq!(written, vec![output.clone()]);

    let text = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "Date,860_CurrentSensor_SIG_Current_mA,528_f_BmsStateRequest_Request_None,528_f_BmsStateRequest_Counter_None"
    );
    assert_eq!(lines[1], "2024-03-01T08:00:00.100000,100,,");
    assert_eq!(lines[2], "2024-03-01T08:00:00.200000,200,Standby,5");
    assert_eq!(lines.len(), 3);
}
