use crate::capability::CapabilitySet;
use crate::error::AnalysisError;
use crate::scoring::FALLBACK_TRACE_DURATION_MS;
use bon::Builder;
use chrome_trace_format::TraceData;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FPS_TARGET: f64 = 60.0;

/// Per-call analysis context, shared read-only by every detector.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct DetectionContext {
    #[builder(default)]
    pub trace_start_us: u64,
    #[builder(default)]
    pub trace_end_us: u64,
    pub frame_budget_ms: f64,
    #[builder(default = CapabilitySet::full())]
    pub capabilities: CapabilitySet,
}

impl DetectionContext {
    /// Derives the context for `trace` at the given frame-rate target.
    ///
    /// An empty trace produces a zero-length window at the origin.
    pub fn from_trace(
        trace: &TraceData,
        fps_target: f64,
        capabilities: CapabilitySet,
    ) -> Result<Self, AnalysisError> {
        let frame_budget_ms = frame_budget_ms(fps_target)?;
        let (trace_start_us, trace_end_us) = trace.time_bounds().unwrap_or((0, 0));
        Ok(Self {
            trace_start_us,
            trace_end_us,
            frame_budget_ms,
            capabilities,
        })
    }

    pub fn trace_duration_ms(&self) -> f64 {
        self.trace_end_us.saturating_sub(self.trace_start_us) as f64 / 1000.0
    }

    /// Trace duration for scoring; never zero.
    pub fn scoring_trace_duration_ms(&self) -> f64 {
        let duration = self.trace_duration_ms();
        if duration > 0.0 {
            duration
        } else {
            FALLBACK_TRACE_DURATION_MS
        }
    }

    pub fn frame_budget_us(&self) -> u64 {
        (self.frame_budget_ms * 1000.0).round().max(1.0) as u64
    }
}

pub fn frame_budget_ms(fps_target: f64) -> Result<f64, AnalysisError> {
    if !fps_target.is_finite() || fps_target <= 0.0 {
        return Err(AnalysisError::InvalidFpsTarget(fps_target));
    }
    Ok(1000.0 / fps_target)
}
