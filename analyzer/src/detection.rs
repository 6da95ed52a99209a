use chrome_trace_format::TraceEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of issue kinds the detectors can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    LayoutThrashing,
    GpuStall,
    LongTask,
    HeavyPaint,
    ForcedReflow,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LayoutThrashing => "layout_thrashing",
            Self::GpuStall => "gpu_stall",
            Self::LongTask => "long_task",
            Self::HeavyPaint => "heavy_paint",
            Self::ForcedReflow => "forced_reflow",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::LayoutThrashing => "layout thrashing",
            Self::GpuStall => "GPU stall",
            Self::LongTask => "long task",
            Self::HeavyPaint => "heavy paint",
            Self::ForcedReflow => "forced reflow",
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Where in the page or source the issue originates. Which fields are set
/// depends on the detection type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub duration_ms: f64,
    pub occurrences: usize,
    pub impact_score: f64,
    pub confidence: Confidence,
    pub estimated_speedup_pct: f64,
    pub speedup_explanation: String,
    pub frame_budget_impact_pct: f64,
    pub risk_assessment: String,
}

/// A raw trace event that contributed to a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub name: String,
    pub ts_us: u64,
    pub duration_ms: f64,
    pub pid: u32,
    pub tid: u32,
}

impl From<&TraceEvent> for EvidenceEvent {
    fn from(event: &TraceEvent) -> Self {
        Self {
            name: event.name.clone(),
            ts_us: event.ts,
            duration_ms: event.duration_ms(),
            pid: event.pid,
            tid: event.tid,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// First contributing events, in time order.
    pub events: Vec<EvidenceEvent>,
    /// Number of events folded into the finding, including those not listed.
    pub total_events: usize,
}

impl Evidence {
    pub const MAX_EVENTS: usize = 10;

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a TraceEvent>) -> Self {
        let mut sorted: Vec<&TraceEvent> = events.into_iter().collect();
        sorted.sort_by_key(|e| e.ts);
        Self {
            total_events: sorted.len(),
            events: sorted
                .into_iter()
                .take(Self::MAX_EVENTS)
                .map(EvidenceEvent::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallType {
    Sync,
    TextureUpload,
    Raster,
}

impl StallType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sync => "GPU sync",
            Self::TextureUpload => "texture upload",
            Self::Raster => "raster",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub layer_id: u64,
    pub bounds: Bounds,
    pub compositing_reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuStall {
    pub element: String,
    pub stall_ms: f64,
    pub occurrences: usize,
    pub stall_type: StallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_info: Option<LayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutThrashing {
    pub selector: String,
    pub reflow_cost_ms: f64,
    pub affected_nodes: u64,
    pub read_write_pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedReflow {
    pub selector: String,
    pub reflow_cost_ms: f64,
    pub affected_nodes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_site: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTask {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub cpu_ms: f64,
    pub correlated_frame_drops: usize,
    pub call_stack: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyPaint {
    pub paint_time_ms: f64,
    pub raster_time_ms: f64,
    pub layer_count: usize,
    pub heavy_frames: usize,
}

/// Type-specific payload of a detection, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectionKind {
    LayoutThrashing(LayoutThrashing),
    GpuStall(GpuStall),
    LongTask(LongTask),
    HeavyPaint(HeavyPaint),
    ForcedReflow(ForcedReflow),
}

impl DetectionKind {
    pub fn detection_type(&self) -> DetectionType {
        match self {
            Self::LayoutThrashing(_) => DetectionType::LayoutThrashing,
            Self::GpuStall(_) => DetectionType::GpuStall,
            Self::LongTask(_) => DetectionType::LongTask,
            Self::HeavyPaint(_) => DetectionType::HeavyPaint,
            Self::ForcedReflow(_) => DetectionType::ForcedReflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub kind: DetectionKind,
    pub severity: Severity,
    pub description: String,
    pub location: Location,
    pub metrics: DetectionMetrics,
    pub evidence: Evidence,
}

impl Detection {
    pub fn detection_type(&self) -> DetectionType {
        self.kind.detection_type()
    }

    pub fn as_gpu_stall(&self) -> Option<&GpuStall> {
        match &self.kind {
            DetectionKind::GpuStall(stall) => Some(stall),
            _ => None,
        }
    }

    pub fn as_layout_thrashing(&self) -> Option<&LayoutThrashing> {
        match &self.kind {
            DetectionKind::LayoutThrashing(thrash) => Some(thrash),
            _ => None,
        }
    }

    pub fn as_forced_reflow(&self) -> Option<&ForcedReflow> {
        match &self.kind {
            DetectionKind::ForcedReflow(reflow) => Some(reflow),
            _ => None,
        }
    }

    pub fn as_long_task(&self) -> Option<&LongTask> {
        match &self.kind {
            DetectionKind::LongTask(task) => Some(task),
            _ => None,
        }
    }

    pub fn as_heavy_paint(&self) -> Option<&HeavyPaint> {
        match &self.kind {
            DetectionKind::HeavyPaint(paint) => Some(paint),
            _ => None,
        }
    }
}
