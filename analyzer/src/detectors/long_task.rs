use crate::capability::Capability;
use crate::context::DetectionContext;
use crate::detection::{Detection, DetectionKind, Location, LongTask};
use crate::detector::{build_detection, round_ms, ClusterMap, Detector};
use crate::error::AnalysisError;
use crate::frames::FrameTimeline;
use crate::payload::{clamp_u32, parse_stack_trace, value_as_u64, ScriptFrame};
use crate::scoring::ScoringContext;
use crate::thresholds::LongTaskThresholds;
use chrome_trace_format::{TraceData, TraceEvent};

pub const NAME: &str = "LongTaskDetector";

const TOPLEVEL_TASKS: &[&str] = &[
    "RunTask",
    "ThreadControllerImpl::RunTask",
    "ThreadPool_RunTask",
    "TaskQueueManager::ProcessTaskFromWorkQueue",
];

const SCRIPT_SPANS: &[&str] = &[
    "FunctionCall",
    "TimerFire",
    "EventDispatch",
    "FireAnimationFrame",
    "EvaluateScript",
    "v8.compile",
    "v8.run",
    "v8.callFunction",
    "RunMicrotasks",
    "ParseHTML",
];

fn is_toplevel(event: &TraceEvent) -> bool {
    TOPLEVEL_TASKS.contains(&event.name.as_str())
}

fn is_script(event: &TraceEvent) -> bool {
    SCRIPT_SPANS.contains(&event.name.as_str())
}

/// Source location of a script span, from its own payload or the first frame
/// of its stack trace.
pub struct ScriptLocation;

impl ScriptLocation {
    pub fn extract(event: &TraceEvent) -> Option<ScriptFrame> {
        let function_name = event
            .arg_str("functionName")
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let url = event
            .arg_str("url")
            .or_else(|| event.arg_str("scriptName"))
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        if function_name.is_some() || url.is_some() {
            return Some(ScriptFrame {
                function_name: function_name.unwrap_or_default(),
                url,
                line: event.arg("lineNumber").and_then(value_as_u64).map(clamp_u32),
                column: event.arg("columnNumber").and_then(value_as_u64).map(clamp_u32),
            });
        }
        Self::stack(event).into_iter().next()
    }

    pub fn stack(event: &TraceEvent) -> Vec<ScriptFrame> {
        event
            .arg("stackTrace")
            .map(parse_stack_trace)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaskKey {
    function_name: String,
    file: Option<String>,
    line: Option<u32>,
}

struct Attribution {
    frame: Option<ScriptFrame>,
    call_stack: Vec<String>,
}

pub struct LongTaskDetector {
    thresholds: LongTaskThresholds,
}

impl LongTaskDetector {
    pub fn new(thresholds: LongTaskThresholds) -> Self {
        Self { thresholds }
    }

    /// Picks the longest script span inside `task` that has a source
    /// location, falling back to the task itself.
    fn attribute(task: &TraceEvent, main_events: &[&TraceEvent]) -> Attribution {
        let start = main_events.partition_point(|e| e.ts < task.ts);
        let culprit = main_events[start..]
            .iter()
            .take_while(|e| e.ts < task.end_us())
            .filter(|e| is_script(e) && e.end_us() <= task.end_us())
            .filter_map(|e| ScriptLocation::extract(e).map(|frame| (*e, frame)))
            .max_by(|(a, _), (b, _)| a.duration_us().cmp(&b.duration_us()).then(b.ts.cmp(&a.ts)));

        let (source, frame) = match culprit {
            Some((event, frame)) => (event, Some(frame)),
            None => (task, ScriptLocation::extract(task)),
        };
        let mut call_stack: Vec<String> = ScriptLocation::stack(source)
            .iter()
            .map(ScriptFrame::to_string)
            .collect();
        if call_stack.is_empty() {
            call_stack.extend(frame.as_ref().map(ScriptFrame::to_string));
        }
        Attribution { frame, call_stack }
    }
}

impl Default for LongTaskDetector {
    fn default() -> Self {
        Self::new(LongTaskThresholds::default())
    }
}

impl Detector for LongTaskDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u32 {
        20
    }

    fn required_capabilities(&self) -> &'static [Capability] {
        &[Capability::LongTasks]
    }

    fn detect(
        &self,
        trace: &TraceData,
        context: &DetectionContext,
    ) -> Result<Vec<Detection>, AnalysisError> {
        let Some(main_thread) = trace.find_main_thread() else {
            return Ok(Vec::new());
        };
        let main_events = trace.thread_events(main_thread);

        let mut tasks: Vec<&TraceEvent> = Vec::new();
        for event in main_events.iter().copied() {
            if !(is_toplevel(event) || is_script(event)) {
                continue;
            }
            if event.duration_ms() < self.thresholds.threshold_ms {
                continue;
            }
            // Long spans nested inside an accepted task belong to that task.
            if tasks.last().is_some_and(|task| event.ts < task.end_us()) {
                continue;
            }
            tasks.push(event);
        }

        let mut clusters: ClusterMap<TaskKey, (Option<u32>, Vec<String>)> = ClusterMap::new();
        for task in tasks {
            let attribution = Self::attribute(task, &main_events);
            let key = match &attribution.frame {
                Some(frame) => TaskKey {
                    function_name: frame.display_name().to_string(),
                    file: frame.file(),
                    line: frame.line,
                },
                None => TaskKey {
                    function_name: task.name.clone(),
                    file: None,
                    line: None,
                },
            };
            let column = attribution.frame.as_ref().and_then(|f| f.column);
            let mut call_stack = attribution.call_stack;
            if call_stack.is_empty() {
                call_stack.push(key.function_name.clone());
            }
            clusters.add(key, task, Some((column, call_stack)));
        }

        let timeline = FrameTimeline::from_trace(trace, context);
        let detections: Vec<Detection> = clusters
            .into_clusters()
            .into_iter()
            .filter(|c| c.total_ms >= self.thresholds.threshold_ms)
            .map(|cluster| {
                let correlated_frame_drops: usize = if timeline.has_frames() {
                    cluster
                        .events
                        .iter()
                        .map(|e| timeline.frame_drops_within(e.ts, e.end_us()))
                        .sum()
                } else {
                    cluster
                        .events
                        .iter()
                        .map(|e| (e.duration_ms() / context.frame_budget_ms).floor() as usize)
                        .sum()
                };
                let cpu_ms = round_ms(
                    cluster
                        .events
                        .iter()
                        .map(|e| e.tdur.unwrap_or(e.duration_us()) as f64 / 1000.0)
                        .sum(),
                );
                let (column, call_stack) = cluster.meta.unwrap_or_default();
                let TaskKey {
                    function_name,
                    file,
                    line,
                } = cluster.key;
                let site = match (&file, line) {
                    (Some(file), Some(line)) => format!(" ({file}:{line})"),
                    (Some(file), None) => format!(" ({file})"),
                    _ => String::new(),
                };
                let description = format!(
                    "Long task in {}{}: {} task(s) blocking the main thread for {:.1}ms",
                    function_name,
                    site,
                    cluster.events.len(),
                    round_ms(cluster.total_ms)
                );
                let location = Location {
                    file: file.clone(),
                    line,
                    column,
                    ..Location::default()
                };
                build_detection(
                    DetectionKind::LongTask(LongTask {
                        function_name,
                        file,
                        line,
                        column,
                        cpu_ms,
                        correlated_frame_drops,
                        call_stack,
                    }),
                    description,
                    location,
                    &cluster.events,
                    context,
                    ScoringContext {
                        correlated_frame_drops: Some(correlated_frame_drops),
                        ..ScoringContext::default()
                    },
                )
            })
            .collect();

        tracing::debug!(detector = NAME, detections = detections.len(), "long task analysis complete");
        Ok(detections)
    }
}
