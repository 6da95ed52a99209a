//! GPU stall detection.
//!
//! GPU work shows up in the trace from the GPU process, the compositor and
//! raster workers. On its own it is harmless; it becomes jank when the
//! renderer main thread has to wait for it. The detector classifies GPU
//! events, keeps those that coincide with main-thread waiting, and clusters
//! them per affected element and stall kind.

use crate::capability::Capability;
use crate::context::DetectionContext;
use crate::detection::{Bounds, Detection, DetectionKind, GpuStall, LayerInfo, Location, StallType};
use crate::detector::{build_detection, round_ms, sorted_events, ClusterMap, Detector};
use crate::error::AnalysisError;
use crate::payload::{url_filename, value_as_f64, value_as_id, value_as_u64};
use crate::scoring::ScoringContext;
use crate::thresholds::GpuThresholds;
use chrome_trace_format::{TraceData, TraceEvent};
use serde_json::Value;

pub const NAME: &str = "GPUStallDetector";

const SYNC_EVENTS: &[&str] = &[
    "CommandBufferProxyImpl::WaitForGetOffsetInRange",
    "CommandBufferProxyImpl::WaitForToken",
    "CommandBufferProxyImpl::Finish",
    "CommandBufferHelper::Finish",
    "GLES2Implementation::Finish",
    "GLES2DecoderImpl::HandleFinish",
    "GpuChannelHost::Send",
    "GpuCommandBufferStub::OnWaitSyncToken",
    "SyncPointManager::Wait",
    "SharedImageInterface::WaitSyncToken",
    "glFinish",
    "glClientWaitSync",
    "glWaitSync",
    "WaitForGpu",
];

const TEXTURE_UPLOAD_EVENTS: &[&str] = &[
    "TextureUploader::Upload",
    "TextureUpload",
    "UploadTexture",
    "ImageUpload",
    "GLES2DecoderImpl::DoTexImage2D",
    "GLES2DecoderImpl::DoTexSubImage2D",
    "GLES2DecoderImpl::DoCompressedTexImage2D",
    "ResourceProvider::CopyToResource",
    "glTexImage2D",
    "glTexSubImage2D",
    "glCompressedTexImage2D",
];

const RASTER_EVENTS: &[&str] = &[
    "RasterTask",
    "GPURasterization",
    "Rasterize",
    "RasterBufferProvider::Playback",
    "GpuRasterBufferProvider::PlaybackOnWorkerThread",
    "RasterDecoderImpl::DoRasterCHROMIUM",
    "RasterSource::PlaybackToCanvas",
];

/// Main-thread event names that indicate the thread is waiting on something.
const BLOCKING_MARKERS: &[&str] = &["Wait", "Sync", "Idle"];

const GPU_CATEGORY_MARKER: &str = "gpu";

pub struct GpuStallDetector {
    thresholds: GpuThresholds,
}

impl GpuStallDetector {
    pub fn new(thresholds: GpuThresholds) -> Self {
        Self { thresholds }
    }
}

impl Default for GpuStallDetector {
    fn default() -> Self {
        Self::new(GpuThresholds::default())
    }
}

/// Classifies an event as a kind of GPU stall.
///
/// Known names classify regardless of category. Other events in a GPU
/// category fall back to name substrings, and finally to `Sync`: unknown GPU
/// work is assumed to be blocking.
pub fn classify(event: &TraceEvent) -> Option<StallType> {
    let name = event.name.as_str();
    if SYNC_EVENTS.contains(&name) {
        return Some(StallType::Sync);
    }
    if TEXTURE_UPLOAD_EVENTS.contains(&name) {
        return Some(StallType::TextureUpload);
    }
    if RASTER_EVENTS.contains(&name) {
        return Some(StallType::Raster);
    }
    if !event.category_contains(GPU_CATEGORY_MARKER) {
        return None;
    }

    let lower = name.to_ascii_lowercase();
    if lower.contains("sync") {
        Some(StallType::Sync)
    } else if lower.contains("texture") {
        Some(StallType::TextureUpload)
    } else if lower.contains("raster") {
        Some(StallType::Raster)
    } else {
        Some(StallType::Sync)
    }
}

/// Identity and layer geometry read from a GPU event's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuPayload {
    pub element: String,
    pub layer_info: Option<LayerInfo>,
}

impl GpuPayload {
    pub fn extract(event: &TraceEvent) -> Self {
        Self {
            element: element_identity(event),
            layer_info: layer_info(event),
        }
    }
}

fn first_arg<'e>(event: &'e TraceEvent, keys: &[&str]) -> Option<&'e Value> {
    keys.iter().find_map(|key| event.arg(key))
}

fn element_identity(event: &TraceEvent) -> String {
    if let Some(value) = first_arg(event, &["elementId", "element", "nodeId", "node_id", "backendNodeId"]) {
        match value {
            Value::Number(_) => {
                if let Some(id) = value_as_id(value) {
                    return format!("node-{id}");
                }
            }
            _ => {
                if let Some(id) = value_as_id(value) {
                    return id;
                }
            }
        }
    }
    if let Some(id) = first_arg(event, &["layerId", "layer_id"]).and_then(value_as_id) {
        return format!("layer-{id}");
    }
    if let Some(url) = first_arg(event, &["url", "imageUrl"])
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
    {
        return url_filename(url);
    }
    if let Some(id) = first_arg(event, &["tileId", "tile_id", "tile"]).and_then(value_as_id) {
        return format!("tile-{id}");
    }
    if let Some(id) = first_arg(event, &["textureId", "texture_id", "texture"]).and_then(value_as_id) {
        return format!("texture-{id}");
    }
    "unknown".to_string()
}

fn layer_info(event: &TraceEvent) -> Option<LayerInfo> {
    let layer_id = first_arg(event, &["layerId", "layer_id"]).and_then(value_as_u64)?;
    let bounds = first_arg(event, &["bounds", "layerBounds"])
        .map(parse_bounds)
        .unwrap_or_default();
    let compositing_reasons = first_arg(event, &["compositingReasons", "compositing_reasons"])
        .and_then(Value::as_array)
        .map(|reasons| {
            reasons
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(LayerInfo {
        layer_id,
        bounds,
        compositing_reasons,
    })
}

fn parse_bounds(value: &Value) -> Bounds {
    let field = |key: &str, index: usize| -> f64 {
        match value {
            Value::Array(items) => items.get(index),
            _ => value.get(key),
        }
        .and_then(value_as_f64)
        .unwrap_or(0.0)
    };
    Bounds {
        x: field("x", 0),
        y: field("y", 1),
        width: field("width", 2),
        height: field("height", 3),
    }
}

/// Time index of main-thread events that indicate waiting.
struct BlockingIndex {
    /// `(start, end)` sorted by start.
    spans: Vec<(u64, u64)>,
    longest_us: u64,
}

impl BlockingIndex {
    fn build(trace: &TraceData, context_events: &[&TraceEvent]) -> Option<Self> {
        let main_thread = trace.find_main_thread()?;
        let spans: Vec<(u64, u64)> = context_events
            .iter()
            .filter(|e| e.thread() == main_thread)
            .filter(|e| BLOCKING_MARKERS.iter().any(|marker| e.name.contains(marker)))
            .map(|e| (e.ts, e.end_us()))
            .collect();
        let longest_us = spans.iter().map(|(start, end)| end - start).max().unwrap_or(0);
        Some(Self { spans, longest_us })
    }

    /// True when a waiting event overlaps `[start, end)`.
    fn overlaps(&self, start: u64, end: u64) -> bool {
        let first_at_or_after = self.spans.partition_point(|&(ts, _)| ts < start);
        if let Some(&(ts, _)) = self.spans.get(first_at_or_after) {
            if ts < end {
                return true;
            }
        }
        // Earlier events can only reach into the interval if they started
        // within the longest waiting span before it.
        self.spans[..first_at_or_after]
            .iter()
            .rev()
            .take_while(|&&(ts, _)| ts.saturating_add(self.longest_us) > start)
            .any(|&(_, span_end)| span_end > start)
    }
}

/// GPU synchronization blocks by construction. Other stalls block when the
/// main thread is waiting meanwhile, or when no main thread is known.
fn blocks_main_thread(
    stall_type: StallType,
    blocking: Option<&BlockingIndex>,
    event: &TraceEvent,
) -> bool {
    stall_type == StallType::Sync
        || blocking.map_or(true, |index| index.overlaps(event.ts, event.end_us()))
}

impl Detector for GpuStallDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u32 {
        30
    }

    fn required_capabilities(&self) -> &'static [Capability] {
        &[Capability::GpuEvents]
    }

    fn detect(
        &self,
        trace: &TraceData,
        context: &DetectionContext,
    ) -> Result<Vec<Detection>, AnalysisError> {
        let events = sorted_events(trace);
        let blocking = BlockingIndex::build(trace, &events);
        if blocking.is_none() {
            tracing::debug!(detector = NAME, "main thread not identified, assuming gpu work blocks");
        }

        let mut clusters: ClusterMap<(String, StallType), LayerInfo> = ClusterMap::new();
        for event in events.iter().copied() {
            let Some(stall_type) = classify(event) else {
                continue;
            };
            if event.duration_ms() < self.thresholds.min_event_ms {
                continue;
            }
            if !blocks_main_thread(stall_type, blocking.as_ref(), event) {
                continue;
            }

            let payload = GpuPayload::extract(event);
            clusters.add((payload.element, stall_type), event, payload.layer_info);
        }

        let detections: Vec<Detection> = clusters
            .into_clusters()
            .into_iter()
            .filter(|c| c.retained(self.thresholds.min_cluster_ms, self.thresholds.min_occurrences))
            .map(|cluster| {
                let (element, stall_type) = cluster.key;
                let stall_ms = round_ms(cluster.total_ms);
                let description = format!(
                    "{} stall on {}: {:.1}ms of main-thread blocking across {} occurrence(s)",
                    stall_type.label(),
                    element,
                    stall_ms,
                    cluster.events.len()
                );
                let location = Location {
                    element: Some(element.clone()),
                    ..Location::default()
                };
                let scoring_context = ScoringContext {
                    stall_type: Some(stall_type),
                    layer_count: cluster.meta.as_ref().map(|_| 1),
                    ..ScoringContext::default()
                };
                build_detection(
                    DetectionKind::GpuStall(GpuStall {
                        element,
                        stall_ms,
                        occurrences: cluster.events.len(),
                        stall_type,
                        layer_info: cluster.meta,
                    }),
                    description,
                    location,
                    &cluster.events,
                    context,
                    scoring_context,
                )
            })
            .collect();

        tracing::debug!(detector = NAME, detections = detections.len(), "gpu stall analysis complete");
        Ok(detections)
    }
}
