use crate::context::DetectionContext;
use chrome_trace_format::TraceData;
use serde::{Deserialize, Serialize};

/// Events that mark the production of a frame, in preference order.
const FRAME_BOUNDARY_NAMES: &[&str] = &["DrawFrame", "BeginFrame"];

const DROPPED_FRAME_NAMES: &[&str] = &["DroppedFrame"];

/// A frame interval is janky once it exceeds this many frame budgets.
const JANK_BUDGET_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub total: usize,
    pub janky: usize,
    pub dropped: usize,
    pub average_fps: f64,
}

/// Frame boundaries recovered from the trace's frame timeline events.
#[derive(Debug, Clone)]
pub struct FrameTimeline {
    boundaries: Vec<u64>,
    dropped: Vec<u64>,
    origin_us: u64,
    budget_us: u64,
}

impl FrameTimeline {
    pub fn from_trace(trace: &TraceData, context: &DetectionContext) -> Self {
        let boundaries = FRAME_BOUNDARY_NAMES
            .iter()
            .map(|name| collect_timestamps(trace, name))
            .find(|stamps| !stamps.is_empty())
            .unwrap_or_default();
        let dropped = DROPPED_FRAME_NAMES
            .iter()
            .flat_map(|name| collect_timestamps(trace, name))
            .collect::<Vec<_>>();

        Self {
            boundaries,
            dropped,
            origin_us: context.trace_start_us,
            budget_us: context.frame_budget_us(),
        }
    }

    /// True when the trace carries frame boundary events.
    pub fn has_frames(&self) -> bool {
        !self.boundaries.is_empty()
    }

    pub fn stats(&self) -> FrameStats {
        let total = self.boundaries.len();
        let janky = self.janky_intervals().count();
        let average_fps = match (self.boundaries.first(), self.boundaries.last()) {
            (Some(first), Some(last)) if last > first => {
                (total - 1) as f64 / ((last - first) as f64 / 1_000_000.0)
            }
            _ => 0.0,
        };
        FrameStats {
            total,
            janky,
            dropped: self.dropped.len(),
            average_fps: (average_fps * 100.0).round() / 100.0,
        }
    }

    /// Index of the frame `ts` belongs to.
    ///
    /// Without frame events the trace is cut into fixed windows of one frame
    /// budget starting at the trace origin.
    pub fn frame_index(&self, ts: u64) -> usize {
        if self.has_frames() {
            self.boundaries.partition_point(|&boundary| boundary <= ts)
        } else {
            (ts.saturating_sub(self.origin_us) / self.budget_us.max(1)) as usize
        }
    }

    /// Counts janky frame intervals and dropped-frame markers overlapping
    /// `[start, end)`.
    pub fn frame_drops_within(&self, start: u64, end: u64) -> usize {
        let janky = self
            .janky_intervals()
            .filter(|&(from, to)| from < end && to > start)
            .count();
        let dropped = self
            .dropped
            .iter()
            .filter(|&&ts| ts >= start && ts < end)
            .count();
        janky + dropped
    }

    fn janky_intervals(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let limit = (self.budget_us as f64 * JANK_BUDGET_FACTOR) as u64;
        self.boundaries
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .filter(move |(from, to)| to - from > limit)
    }
}

fn collect_timestamps(trace: &TraceData, name: &str) -> Vec<u64> {
    let mut stamps: Vec<u64> = trace
        .timed_events()
        .filter(|e| e.name == name)
        .map(|e| e.ts)
        .collect();
    stamps.sort_unstable();
    stamps.dedup();
    stamps
}
