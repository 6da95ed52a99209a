use chrome_trace_format::{Phase, ThreadKey, TraceData, TraceFormatError};
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;

const DEVTOOLS_TRACE: &str = r#"{
  "traceEvents": [
    {"pid": 100, "tid": 1, "ts": 0, "ph": "M", "cat": "__metadata", "name": "thread_name", "args": {"name": "CrRendererMain"}},
    {"pid": 100, "tid": 2, "ts": 0, "ph": "M", "cat": "__metadata", "name": "thread_name", "args": {"name": "Compositor"}},
    {"pid": 100, "tid": 1, "ts": 1000, "ph": "X", "cat": "devtools.timeline", "name": "Layout", "dur": 3000,
     "args": {"beginData": {"dirtyObjects": 12, "totalObjects": 40, "frame": "F1"}, "endData": {"root": [0, 0]}}},
    {"pid": 100, "tid": 2, "ts": 1500, "ph": "X", "cat": "cc", "name": "RasterTask", "dur": 800},
    {"pid": 100, "tid": 1, "ts": 9000, "ph": "I", "cat": "devtools.timeline", "name": "DroppedFrame", "s": "t"}
  ],
  "metadata": {"source": "DevTools", "startTime": "2025-01-01T00:00:00Z"}
}"#;

#[fixture]
fn trace_dir() -> TempDir {
    TempDir::new().expect("failed to create temp dir")
}

#[rstest]
fn test_load_devtools_export(trace_dir: TempDir) {
    let path = trace_dir.path().join("trace.json");
    fs::write(&path, DEVTOOLS_TRACE).expect("failed to write trace");

    let trace = TraceData::from_path(&path).expect("failed to load trace");
    assert_eq!(trace.len(), 5);
    assert_eq!(trace.find_main_thread(), Some(ThreadKey::new(100, 1)));
    assert_eq!(trace.time_bounds(), Some((1000, 9000)));
    assert_eq!(trace.thread_names().len(), 2);

    let layout = &trace.trace_events[2];
    assert_eq!(layout.ph, Phase::Complete);
    assert_eq!(
        layout.arg_path(&["beginData", "dirtyObjects"]).and_then(|v| v.as_u64()),
        Some(12)
    );
    assert!(trace.trace_events[4].ph.is_instant());
}

#[rstest]
fn test_missing_file_reports_path(trace_dir: TempDir) {
    let path = trace_dir.path().join("missing.json");
    let err = TraceData::from_path(&path).unwrap_err();
    match err {
        TraceFormatError::Read { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn test_round_trip_keeps_capture_order() {
    let trace = TraceData::from_json_str(DEVTOOLS_TRACE).expect("failed to parse trace");
    let json = serde_json::to_string(&trace).expect("failed to serialize trace");
    let reparsed = TraceData::from_json_str(&json).expect("failed to reparse trace");
    assert_eq!(trace, reparsed);
}

#[rstest]
fn test_empty_trace_formats() {
    assert!(TraceData::from_json_str("[]").expect("empty array").is_empty());
    assert!(TraceData::from_json_str("{}").expect("empty object").is_empty());
}
