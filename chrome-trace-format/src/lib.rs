// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Chrome Trace Format
//!
//! A loosely-typed model of the Chrome Trace Event Format as emitted by browser
//! tracing (DevTools performance recordings, `chrome://tracing`, CDP
//! `Tracing.dataCollected` payloads).
//!
//! Browser traces are produced by many subsystems (Blink, V8, cc, viz, the GPU
//! process) and every one of them attaches its own free-form `args` payload.
//! Instead of one struct per phase, a single [`TraceEvent`] carries the common
//! envelope and keeps `args` as a raw [`serde_json::Value`]. Consumers read
//! the payload through [`TraceEvent::arg`] and friends.
//!
//! ## Format Overview
//!
//! Traces can be provided in two formats, both accepted by [`TraceData`]:
//! - **JSON Array Format**: a bare array of trace events
//! - **JSON Object Format**: an object with `traceEvents` and optional `metadata`
//!
//! ## Timestamps
//!
//! All timestamps and durations are in microseconds. Fractional values are
//! truncated; negative values clamp to zero.

use serde::de::{IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Thread labels Chromium gives the renderer main thread.
pub const RENDERER_MAIN_THREAD_NAMES: &[&str] = &["CrRendererMain"];

/// Thread labels Chromium gives the browser main thread.
pub const BROWSER_MAIN_THREAD_NAMES: &[&str] = &["CrBrowserMain"];

/// Metadata event name that declares a thread's display name.
pub const THREAD_NAME: &str = "thread_name";

/// Metadata event name that declares a process's display name.
pub const PROCESS_NAME: &str = "process_name";

#[derive(Error, Debug)]
pub enum TraceFormatError {
    #[error("failed to read trace file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error while reading trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid trace json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Event phase types that determine the kind of event.
///
/// Codes the analysis does not care about still parse; anything the format
/// does not define lands in [`Phase::Other`] instead of failing the whole
/// trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Begin phase of a duration event.
    #[serde(rename = "B")]
    DurationBegin,
    /// End phase of a duration event.
    #[serde(rename = "E")]
    DurationEnd,
    /// Complete event that combines begin and end with a duration.
    #[serde(rename = "X")]
    Complete,
    /// Instant event with no duration.
    #[serde(rename = "i")]
    Instant,
    /// Deprecated instant event phase, still emitted by Blink.
    #[serde(rename = "I")]
    InstantDeprecated,
    /// Counter event.
    #[serde(rename = "C")]
    Counter,
    /// Begin phase of a nestable async event.
    #[serde(rename = "b")]
    AsyncBegin,
    /// Instant event within an async operation.
    #[serde(rename = "n")]
    AsyncStep,
    /// End phase of a nestable async event.
    #[serde(rename = "e")]
    AsyncEnd,
    /// Start of a flow event.
    #[serde(rename = "s")]
    FlowBegin,
    /// Intermediate step in a flow event sequence.
    #[serde(rename = "t")]
    FlowStep,
    /// End of a flow event.
    #[serde(rename = "f")]
    FlowEnd,
    /// Sample event from a sampling profiler.
    #[serde(rename = "P")]
    Sample,
    /// Object creation event.
    #[serde(rename = "N")]
    ObjectCreated,
    /// Object snapshot event.
    #[serde(rename = "O")]
    ObjectSnapshot,
    /// Object destruction event.
    #[serde(rename = "D")]
    ObjectDestroyed,
    /// Metadata event for process/thread names and other information.
    #[serde(rename = "M")]
    Metadata,
    /// Navigation timing mark event.
    #[serde(rename = "R")]
    Mark,
    /// Global memory dump event.
    #[serde(rename = "V")]
    GlobalMemoryDump,
    /// Process memory dump event.
    #[serde(rename = "v")]
    ProcessMemoryDump,
    /// Clock synchronization event.
    #[serde(rename = "c")]
    ClockSync,
    /// Context enter event.
    #[serde(rename = "(")]
    ContextEnter,
    /// Context leave event.
    #[serde(rename = ")")]
    ContextLeave,
    /// Linked ID event.
    #[serde(rename = "=")]
    LinkedId,
    /// Any phase code not listed above.
    #[serde(other)]
    #[default]
    Other,
}

impl Phase {
    pub fn is_instant(self) -> bool {
        matches!(self, Phase::Instant | Phase::InstantDeprecated)
    }
}

/// Process/thread pair identifying a trace track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub pid: u32,
    pub tid: u32,
}

impl ThreadKey {
    pub fn new(pid: u32, tid: u32) -> Self {
        Self { pid, tid }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.tid)
    }
}

/// A single trace event.
///
/// Missing optional fields never fail deserialization: `cat` defaults to the
/// empty string, `dur`/`tdur`/`args`/`s` to absent, `pid`/`tid` to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Process ID. Accepts numbers and numeric strings.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub pid: u32,
    /// Thread ID. Accepts numbers and numeric strings.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub tid: u32,
    /// Timestamp in microseconds.
    #[serde(default, deserialize_with = "deserialize_micros")]
    pub ts: u64,
    /// Event phase.
    #[serde(default)]
    pub ph: Phase,
    /// Category tag(s). Chromium joins several with commas.
    #[serde(default)]
    pub cat: String,
    /// Event name.
    #[serde(default)]
    pub name: String,
    /// Wall-clock duration in microseconds, for complete events.
    #[serde(
        default,
        deserialize_with = "deserialize_opt_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub dur: Option<u64>,
    /// Thread-clock duration in microseconds.
    #[serde(
        default,
        deserialize_with = "deserialize_opt_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub tdur: Option<u64>,
    /// Instant event scope (`g`, `p` or `t`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Free-form payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl TraceEvent {
    /// Creates a complete (`X`) event. Mostly useful for building fixtures.
    pub fn complete(
        name: impl Into<String>,
        cat: impl Into<String>,
        thread: ThreadKey,
        ts: u64,
        dur: u64,
    ) -> Self {
        Self {
            pid: thread.pid,
            tid: thread.tid,
            ts,
            ph: Phase::Complete,
            cat: cat.into(),
            name: name.into(),
            dur: Some(dur),
            tdur: None,
            s: None,
            args: None,
        }
    }

    /// Creates an instant (`I`) event with thread scope.
    pub fn instant(
        name: impl Into<String>,
        cat: impl Into<String>,
        thread: ThreadKey,
        ts: u64,
    ) -> Self {
        Self {
            pid: thread.pid,
            tid: thread.tid,
            ts,
            ph: Phase::InstantDeprecated,
            cat: cat.into(),
            name: name.into(),
            dur: None,
            tdur: None,
            s: Some("t".to_string()),
            args: None,
        }
    }

    /// Creates a `thread_name` metadata event.
    pub fn thread_name(thread: ThreadKey, name: impl Into<String>) -> Self {
        Self {
            pid: thread.pid,
            tid: thread.tid,
            ts: 0,
            ph: Phase::Metadata,
            cat: "__metadata".to_string(),
            name: THREAD_NAME.to_string(),
            dur: None,
            tdur: None,
            s: None,
            args: Some(serde_json::json!({ "name": name.into() })),
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn thread(&self) -> ThreadKey {
        ThreadKey::new(self.pid, self.tid)
    }

    pub fn is_metadata(&self) -> bool {
        self.ph == Phase::Metadata
    }

    pub fn duration_us(&self) -> u64 {
        self.dur.unwrap_or(0)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_us() as f64 / 1000.0
    }

    pub fn end_us(&self) -> u64 {
        self.ts.saturating_add(self.duration_us())
    }

    /// True when any comma-separated category equals `tag`.
    pub fn has_category(&self, tag: &str) -> bool {
        self.cat.split(',').any(|c| c.trim() == tag)
    }

    /// Case-insensitive substring match over the raw category string.
    pub fn category_contains(&self, needle: &str) -> bool {
        self.cat
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    }

    /// Looks `key` up in `args`, then in `args.data`.
    ///
    /// Blink nests most timeline payloads under `data`, while GPU and cc
    /// events tend to put fields at the top level.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        let args = self.args.as_ref()?;
        args.get(key)
            .or_else(|| args.get("data").and_then(|data| data.get(key)))
    }

    /// Follows a nested path below `args`, e.g. `["beginData", "stackTrace"]`.
    pub fn arg_path(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self.args.as_ref()?;
        for key in path {
            current = current.get(*key)?;
        }
        Some(current)
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arg(key).and_then(Value::as_str)
    }

    /// Declared name of a `thread_name` metadata event.
    pub fn declared_thread_name(&self) -> Option<&str> {
        if !self.is_metadata() || self.name != THREAD_NAME {
            return None;
        }
        self.arg_str("name")
    }
}

/// A whole trace: the event list plus optional trace-level metadata.
///
/// `trace_events` keeps capture order, which is not necessarily time order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceData {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Streams either JSON form straight into events, so a malformed event is
/// reported with its position in the document.
impl<'de> Deserialize<'de> for TraceData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TraceDataVisitor)
    }
}

struct TraceDataVisitor;

impl<'de> Visitor<'de> for TraceDataVisitor {
    type Value = TraceData;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of trace events or an object with traceEvents")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<TraceData, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut trace_events = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(event) = seq.next_element()? {
            trace_events.push(event);
        }
        Ok(TraceData::new(trace_events))
    }

    fn visit_map<A>(self, mut map: A) -> Result<TraceData, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut trace = TraceData::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "traceEvents" => trace.trace_events = map.next_value()?,
                "metadata" => trace.metadata = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(trace)
    }
}

impl TraceData {
    pub fn new(trace_events: Vec<TraceEvent>) -> Self {
        Self {
            trace_events,
            metadata: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, TraceFormatError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_slice(json: &[u8]) -> Result<Self, TraceFormatError> {
        Ok(serde_json::from_slice(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TraceFormatError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TraceFormatError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| TraceFormatError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_slice(&bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.trace_events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.trace_events.len()
    }

    /// Events that carry timing, i.e. everything except metadata.
    pub fn timed_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter().filter(|e| !e.is_metadata())
    }

    /// Earliest `ts` and latest `ts + dur` over non-metadata events.
    ///
    /// Metadata events usually carry `ts = 0` and would drag the start of the
    /// trace back to the epoch.
    pub fn time_bounds(&self) -> Option<(u64, u64)> {
        self.timed_events().fold(None, |bounds, event| {
            let (start, end) = bounds.unwrap_or((event.ts, event.end_us()));
            Some((start.min(event.ts), end.max(event.end_us())))
        })
    }

    pub fn thread_names(&self) -> BTreeMap<ThreadKey, String> {
        self.trace_events
            .iter()
            .filter_map(|e| e.declared_thread_name().map(|name| (e.thread(), name.to_string())))
            .collect()
    }

    /// Identifies the main thread of the page.
    ///
    /// A thread declared as the renderer main thread wins over one declared as
    /// the browser main thread. Without declarations the busiest thread is
    /// picked, ties going to the lowest `(pid, tid)`.
    pub fn find_main_thread(&self) -> Option<ThreadKey> {
        let names = self.thread_names();
        for labels in [RENDERER_MAIN_THREAD_NAMES, BROWSER_MAIN_THREAD_NAMES] {
            if let Some((thread, _)) = names.iter().find(|(_, name)| labels.contains(&name.as_str())) {
                return Some(*thread);
            }
        }

        let mut counts: HashMap<ThreadKey, usize> = HashMap::new();
        for event in self.timed_events() {
            *counts.entry(event.thread()).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by(|(a_thread, a_count), (b_thread, b_count)| {
                a_count.cmp(b_count).then_with(|| b_thread.cmp(a_thread))
            })
            .map(|(thread, _)| thread)
    }

    /// Non-metadata events of one thread, sorted by timestamp.
    ///
    /// Among events sharing a timestamp the longer one comes first, so an
    /// enclosing span always precedes the spans nested in it. Full ties keep
    /// capture order.
    pub fn thread_events(&self, thread: ThreadKey) -> Vec<&TraceEvent> {
        let mut events: Vec<&TraceEvent> = self
            .timed_events()
            .filter(|e| e.thread() == thread)
            .collect();
        events.sort_by_key(|e| (e.ts, Reverse(e.duration_us())));
        events
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl RawNumber {
    fn to_u64(&self) -> u64 {
        match self {
            RawNumber::Unsigned(v) => *v,
            RawNumber::Signed(v) => (*v).max(0) as u64,
            RawNumber::Float(v) if v.is_finite() && *v > 0.0 => *v as u64,
            RawNumber::Float(_) => 0,
            RawNumber::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(|v| v as u64)
                .unwrap_or(0),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawNumber>::deserialize(deserializer)?;
    Ok(raw.map(|r| r.to_u64().min(u32::MAX as u64) as u32).unwrap_or(0))
}

fn deserialize_micros<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawNumber>::deserialize(deserializer)?;
    Ok(raw.map(|r| r.to_u64()).unwrap_or(0))
}

fn deserialize_opt_micros<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawNumber>::deserialize(deserializer)?;
    Ok(raw.map(|r| r.to_u64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use serde_json::json;

    const MAIN: ThreadKey = ThreadKey { pid: 1, tid: 10 };
    const WORKER: ThreadKey = ThreadKey { pid: 1, tid: 11 };

    #[fixture]
    fn named_trace() -> TraceData {
        TraceData::new(vec![
            TraceEvent::thread_name(WORKER, "CrBrowserMain"),
            TraceEvent::thread_name(MAIN, "CrRendererMain"),
            TraceEvent::complete("RunTask", "toplevel", WORKER, 100, 10),
            TraceEvent::complete("RunTask", "toplevel", WORKER, 200, 10),
            TraceEvent::complete("Layout", "devtools.timeline", MAIN, 150, 500),
        ])
    }

    #[rstest]
    fn test_parse_array_format() {
        let trace = TraceData::from_json_str(
            r#"[{"pid":1,"tid":2,"ts":1000,"ph":"X","cat":"gpu","name":"Finish","dur":2500}]"#,
        )
        .expect("array format");
        assert_eq!(trace.len(), 1);
        let event = &trace.trace_events[0];
        assert_eq!(event.ph, Phase::Complete);
        assert_eq!(event.duration_us(), 2500);
        assert_eq!(event.end_us(), 3500);
        assert!(trace.metadata.is_none());
    }

    #[rstest]
    fn test_parse_object_format_with_metadata() {
        let trace = TraceData::from_json_str(
            r#"{"traceEvents":[{"pid":1,"tid":2,"ts":5,"ph":"I","name":"Mark"}],"metadata":{"source":"DevTools"}}"#,
        )
        .expect("object format");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.trace_events[0].cat, "");
        assert!(trace.trace_events[0].args.is_none());
        assert_eq!(trace.metadata, Some(json!({"source": "DevTools"})));
    }

    #[rstest]
    fn test_lenient_numbers_and_unknown_phase() {
        let trace = TraceData::from_json_str(
            r#"[{"pid":"42","tid":7,"ts":12.9,"ph":"Z","name":"Weird","dur":-4}]"#,
        )
        .expect("lenient event");
        let event = &trace.trace_events[0];
        assert_eq!(event.pid, 42);
        assert_eq!(event.ts, 12);
        assert_eq!(event.ph, Phase::Other);
        assert_eq!(event.dur, Some(0));
    }

    #[rstest]
    fn test_invalid_json_is_an_error() {
        let err = TraceData::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, TraceFormatError::Json(_)));
    }

    #[rstest]
    fn test_arg_falls_back_to_data_payload() {
        let event = TraceEvent::complete("Paint", "devtools.timeline", MAIN, 0, 10).with_args(json!({
            "layerId": 3,
            "data": { "nodeId": 9, "layerId": 4 }
        }));
        assert_eq!(event.arg("layerId"), Some(&json!(3)));
        assert_eq!(event.arg("nodeId"), Some(&json!(9)));
        assert_eq!(event.arg_path(&["data", "layerId"]), Some(&json!(4)));
        assert!(event.arg("missing").is_none());
    }

    #[rstest]
    fn test_categories() {
        let event = TraceEvent::complete("x", "disabled-by-default-gpu.service,viz", MAIN, 0, 0);
        assert!(event.has_category("viz"));
        assert!(!event.has_category("gpu"));
        assert!(event.category_contains("GPU"));
    }

    #[rstest]
    fn test_main_thread_prefers_renderer_label(named_trace: TraceData) {
        assert_eq!(named_trace.find_main_thread(), Some(MAIN));
    }

    #[rstest]
    fn test_main_thread_falls_back_to_busiest_thread() {
        let trace = TraceData::new(vec![
            TraceEvent::complete("a", "", MAIN, 0, 1),
            TraceEvent::complete("b", "", WORKER, 0, 1),
            TraceEvent::complete("c", "", WORKER, 5, 1),
        ]);
        assert_eq!(trace.find_main_thread(), Some(WORKER));
        assert_eq!(TraceData::default().find_main_thread(), None);
    }

    #[rstest]
    fn test_time_bounds_ignore_metadata(named_trace: TraceData) {
        assert_eq!(named_trace.time_bounds(), Some((100, 650)));
        assert_eq!(TraceData::default().time_bounds(), None);
    }

    #[rstest]
    fn test_thread_events_sorted(named_trace: TraceData) {
        let events = named_trace.thread_events(WORKER);
        let stamps: Vec<u64> = events.iter().map(|e| e.ts).collect();
        assert_eq!(stamps, vec![100, 200]);
    }

    #[rstest]
    fn test_enclosing_span_sorts_before_child_at_same_ts() {
        let trace = TraceData::new(vec![
            TraceEvent::complete("FunctionCall", "devtools.timeline", WORKER, 100, 60),
            TraceEvent::complete("RunTask", "toplevel", WORKER, 100, 200),
            TraceEvent::complete("Layout", "devtools.timeline", WORKER, 50, 10),
        ]);
        let names: Vec<&str> = trace
            .thread_events(WORKER)
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["Layout", "RunTask", "FunctionCall"]);
    }

    #[rstest]
    fn test_malformed_event_reports_position() {
        let json = "{\"traceEvents\": [\n{\"ph\": \"X\", \"ts\": 1, \"name\": 5}\n]}";
        let err = TraceData::from_json_str(json).unwrap_err().to_string();
        assert!(!err.contains("did not match any variant"), "{err}");
        assert!(err.contains("line 2"), "{err}");
    }

    #[rstest]
    fn test_unknown_top_level_keys_are_ignored() {
        let json = r#"{"displayTimeUnit": "ns", "stackFrames": {"1": {"name": "f"}},
            "traceEvents": [{"ph": "X", "ts": 1, "dur": 2, "name": "Paint"}],
            "metadata": {"clock-domain": "LINUX_CLOCK_MONOTONIC"}}"#;
        let trace = TraceData::from_json_str(json).expect("parse");
        assert_eq!(trace.trace_events.len(), 1);
        assert!(trace.metadata.is_some());
    }

    #[rstest]
    fn test_top_level_scalar_is_rejected() {
        let err = TraceData::from_json_str("42").unwrap_err().to_string();
        assert!(err.contains("traceEvents"), "{err}");
    }
}
