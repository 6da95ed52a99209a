//! Heavy paint detection.
//!
//! Paint and raster work is bucketed per frame. Frames whose combined paint
//! and raster time eats a large share of the frame budget are heavy; all of
//! their work is reported as a single document-level finding. Spans nested
//! inside an already counted span on the same thread are not counted again.

use crate::capability::Capability;
use crate::context::DetectionContext;
use crate::detection::{Detection, DetectionKind, HeavyPaint, Location};
use crate::detector::{build_detection, round_ms, sorted_events, Detector};
use crate::error::AnalysisError;
use crate::frames::FrameTimeline;
use crate::payload::value_as_id;
use crate::scoring::ScoringContext;
use crate::thresholds::PaintThresholds;
use chrome_trace_format::{ThreadKey, TraceData, TraceEvent};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const NAME: &str = "HeavyPaintDetector";

const DOCUMENT: &str = "document";

const PAINT_EVENTS: &[&str] = &[
    "Paint",
    "PaintImage",
    "PaintSetup",
    "UpdateLayer",
    "CompositeLayers",
    "Layerize",
];

const RASTER_EVENTS: &[&str] = &["Rasterize", "RasterTask", "GPURasterization", "Raster"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaintWork {
    Paint,
    Raster,
}

impl PaintWork {
    fn classify(event: &TraceEvent) -> Option<Self> {
        let name = event.name.as_str();
        if PAINT_EVENTS.contains(&name) {
            Some(Self::Paint)
        } else if RASTER_EVENTS.contains(&name) {
            Some(Self::Raster)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct FrameLoad<'t> {
    paint_ms: f64,
    raster_ms: f64,
    events: Vec<&'t TraceEvent>,
}

impl FrameLoad<'_> {
    fn total_ms(&self) -> f64 {
        self.paint_ms + self.raster_ms
    }
}

pub struct HeavyPaintDetector {
    thresholds: PaintThresholds,
}

impl HeavyPaintDetector {
    pub fn new(thresholds: PaintThresholds) -> Self {
        Self { thresholds }
    }
}

impl Default for HeavyPaintDetector {
    fn default() -> Self {
        Self::new(PaintThresholds::default())
    }
}

impl Detector for HeavyPaintDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u32 {
        40
    }

    fn required_capabilities(&self) -> &'static [Capability] {
        &[Capability::PaintEvents]
    }

    fn detect(
        &self,
        trace: &TraceData,
        context: &DetectionContext,
    ) -> Result<Vec<Detection>, AnalysisError> {
        let timeline = FrameTimeline::from_trace(trace, context);
        let mut frames: BTreeMap<usize, FrameLoad> = BTreeMap::new();
        // End of the outermost counted span per thread; spans inside it are
        // already part of its duration.
        let mut counted_until: HashMap<ThreadKey, u64> = HashMap::new();
        for event in sorted_events(trace) {
            let Some(work) = PaintWork::classify(event) else {
                continue;
            };
            let duration_ms = event.duration_ms();
            if duration_ms < self.thresholds.min_event_ms {
                continue;
            }
            let end_us = event.end_us();
            match counted_until.entry(event.thread()) {
                Entry::Occupied(mut open) => {
                    if end_us <= *open.get() {
                        continue;
                    }
                    open.insert(end_us);
                }
                Entry::Vacant(slot) => {
                    slot.insert(end_us);
                }
            }
            let load = frames.entry(timeline.frame_index(event.ts)).or_default();
            match work {
                PaintWork::Paint => load.paint_ms += duration_ms,
                PaintWork::Raster => load.raster_ms += duration_ms,
            }
            load.events.push(event);
        }

        let limit_ms = context.frame_budget_ms * self.thresholds.frame_budget_ratio;
        let heavy: Vec<FrameLoad> = frames
            .into_values()
            .filter(|load| load.total_ms() > limit_ms)
            .collect();
        let total_ms: f64 = heavy.iter().map(FrameLoad::total_ms).sum();
        if heavy.is_empty()
            || (heavy.len() < self.thresholds.min_heavy_frames
                && total_ms < context.frame_budget_ms)
        {
            tracing::debug!(detector = NAME, heavy_frames = heavy.len(), "no heavy paint");
            return Ok(Vec::new());
        }

        let paint_time_ms = round_ms(heavy.iter().map(|load| load.paint_ms).sum());
        let raster_time_ms = round_ms(heavy.iter().map(|load| load.raster_ms).sum());
        let events: Vec<&TraceEvent> = heavy
            .iter()
            .flat_map(|load| load.events.iter().copied())
            .collect();
        let layers: BTreeSet<String> = events
            .iter()
            .filter_map(|e| e.arg("layerId").and_then(value_as_id))
            .collect();
        let layer_count = layers.len().max(1);
        let heavy_frames = heavy.len();

        let description = format!(
            "Heavy paint in {} frame(s): {:.1}ms painting and {:.1}ms rasterizing across {} layer(s), each frame over {:.0}% of the {:.1}ms frame budget",
            heavy_frames,
            paint_time_ms,
            raster_time_ms,
            layer_count,
            self.thresholds.frame_budget_ratio * 100.0,
            context.frame_budget_ms
        );
        let detection = build_detection(
            DetectionKind::HeavyPaint(HeavyPaint {
                paint_time_ms,
                raster_time_ms,
                layer_count,
                heavy_frames,
            }),
            description,
            Location {
                element: Some(DOCUMENT.to_string()),
                ..Location::default()
            },
            &events,
            context,
            ScoringContext {
                layer_count: Some(layer_count),
                ..ScoringContext::default()
            },
        );

        tracing::debug!(detector = NAME, heavy_frames, "heavy paint detected");
        Ok(vec![detection])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use serde_json::json;

    const MAIN: ThreadKey = ThreadKey { pid: 1, tid: 1 };
    const RASTER_WORKER: ThreadKey = ThreadKey { pid: 1, tid: 7 };

    fn context() -> DetectionContext {
        DetectionContext::builder()
            .trace_start_us(0)
            .trace_end_us(100_000)
            .frame_budget_ms(1000.0 / 60.0)
            .build()
    }

    fn paint(name: &str, thread: ThreadKey, ts: u64, dur: u64, layer: Option<u64>) -> TraceEvent {
        let event = TraceEvent::complete(name, "devtools.timeline", thread, ts, dur);
        match layer {
            Some(layer) => event.with_args(json!({"data": {"layerId": layer}})),
            None => event,
        }
    }

    #[fixture]
    fn two_heavy_frames() -> TraceData {
        TraceData::new(vec![
            TraceEvent::thread_name(MAIN, "CrRendererMain"),
            // frame 0: 10ms of paint + raster
            paint("Paint", MAIN, 1_000, 6_000, Some(5)),
            paint("RasterTask", RASTER_WORKER, 8_000, 4_000, Some(7)),
            // frame 1: light
            paint("Paint", MAIN, 20_000, 3_000, Some(5)),
            // frame 2: 10ms again
            paint("Paint", MAIN, 34_000, 6_000, Some(5)),
            paint("Rasterize", RASTER_WORKER, 41_000, 4_000, None),
            // below the floor
            paint("PaintImage", MAIN, 42_000, 50, None),
        ])
    }

    #[rstest]
    fn test_heavy_frames_fold_into_document(two_heavy_frames: TraceData) {
        let detections = HeavyPaintDetector::default()
            .detect(&two_heavy_frames, &context())
            .expect("detect");
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        let heavy = detection.as_heavy_paint().expect("heavy paint");
        assert_eq!(heavy.heavy_frames, 2);
        assert_eq!(heavy.paint_time_ms, 12.0);
        assert_eq!(heavy.raster_time_ms, 8.0);
        assert_eq!(heavy.layer_count, 2);
        assert_eq!(detection.location.element.as_deref(), Some("document"));
        assert_eq!(detection.metrics.occurrences, 4);
        assert_eq!(detection.metrics.duration_ms, 20.0);
    }

    #[rstest]
    fn test_single_heavy_frame_needs_a_full_budget() {
        let light = TraceData::new(vec![paint("Paint", MAIN, 0, 9_000, None)]);
        let detections = HeavyPaintDetector::default()
            .detect(&light, &context())
            .expect("detect");
        assert!(detections.is_empty());

        let saturated = TraceData::new(vec![paint("Paint", MAIN, 0, 18_000, None)]);
        let detections = HeavyPaintDetector::default()
            .detect(&saturated, &context())
            .expect("detect");
        assert_eq!(detections.len(), 1);
        let heavy = detections[0].as_heavy_paint().expect("heavy paint");
        assert_eq!(heavy.heavy_frames, 1);
        assert_eq!(heavy.layer_count, 1);
    }

    #[rstest]
    fn test_frame_timeline_buckets() {
        // Paint straddles window edges but stays inside one long drawn frame.
        let trace = TraceData::new(vec![
            TraceEvent::instant("DrawFrame", "devtools.timeline.frame", MAIN, 0),
            paint("Paint", MAIN, 10_000, 5_000, None),
            paint("Paint", MAIN, 20_000, 5_000, None),
            TraceEvent::instant("DrawFrame", "devtools.timeline.frame", MAIN, 40_000),
        ]);
        let detections = HeavyPaintDetector::default()
            .detect(&trace, &context())
            .expect("detect");
        assert!(detections.is_empty(), "one heavy frame of 10ms stays under the budget");

        let strict = HeavyPaintDetector::new(PaintThresholds {
            min_heavy_frames: 1,
            ..PaintThresholds::default()
        });
        let detections = strict.detect(&trace, &context()).expect("detect");
        assert_eq!(detections[0].as_heavy_paint().map(|p| p.heavy_frames), Some(1));
    }

    #[rstest]
    fn test_nested_paint_counted_once() {
        // Two frames, each a 6ms Paint wrapping a 5ms PaintImage.
        let trace = TraceData::new(vec![
            TraceEvent::thread_name(MAIN, "CrRendererMain"),
            paint("Paint", MAIN, 1_000, 6_000, None),
            paint("PaintImage", MAIN, 1_500, 5_000, None),
            paint("Paint", MAIN, 20_000, 6_000, None),
            paint("PaintImage", MAIN, 20_500, 5_000, None),
        ]);
        let detections = HeavyPaintDetector::default()
            .detect(&trace, &context())
            .expect("detect");
        assert!(detections.is_empty(), "6ms per frame stays under half the budget");

        let strict = HeavyPaintDetector::new(PaintThresholds {
            frame_budget_ratio: 0.3,
            min_heavy_frames: 1,
            ..PaintThresholds::default()
        });
        let detections = strict.detect(&trace, &context()).expect("detect");
        let heavy = detections[0].as_heavy_paint().expect("heavy paint");
        assert_eq!(heavy.heavy_frames, 2);
        assert_eq!(heavy.paint_time_ms, 12.0);
        assert_eq!(detections[0].metrics.occurrences, 2);
    }

    #[rstest]
    fn test_parent_listed_after_child_still_wins() {
        let trace = TraceData::new(vec![
            paint("PaintImage", MAIN, 1_000, 5_000, None),
            paint("UpdateLayer", MAIN, 1_000, 12_000, Some(3)),
            paint("RasterTask", RASTER_WORKER, 2_000, 4_000, None),
        ]);
        let strict = HeavyPaintDetector::new(PaintThresholds {
            min_heavy_frames: 1,
            ..PaintThresholds::default()
        });
        let detections = strict.detect(&trace, &context()).expect("detect");
        let heavy = detections[0].as_heavy_paint().expect("heavy paint");
        assert_eq!(heavy.paint_time_ms, 12.0);
        assert_eq!(heavy.raster_time_ms, 4.0);
    }

    #[rstest]
    fn test_no_paint_events() {
        let trace = TraceData::new(vec![TraceEvent::complete("Layout", "", MAIN, 0, 30_000)]);
        assert!(HeavyPaintDetector::default()
            .detect(&trace, &context())
            .expect("detect")
            .is_empty());
    }
}
