//! Shared scoring for every detector.
//!
//! The score depends only on the [`ScoringInput`]; findings of different
//! detection types are therefore comparable with each other.

use crate::detection::{Confidence, DetectionType, Severity, StallType};
use bon::Builder;
use serde::{Deserialize, Serialize};

/// Speedup claims never exceed this percentage.
pub const MAX_SPEEDUP_PCT: f64 = 80.0;

/// Trace duration used when the real one is zero or negative.
pub const FALLBACK_TRACE_DURATION_MS: f64 = 1000.0;

/// Frame budgets at which the duration component reaches ~63% of its weight.
const DURATION_SCALE_BUDGETS: f64 = 4.0;

/// Occurrences at which the recurrence component reaches ~63% of its weight.
const OCCURRENCE_SCALE: f64 = 5.0;

const DURATION_WEIGHT: f64 = 0.7;
const OCCURRENCE_WEIGHT: f64 = 0.3;

const HIGH_CONFIDENCE_MS: f64 = 50.0;
const MEDIUM_CONFIDENCE_MS: f64 = 10.0;
const RECURRENCE_CONFIDENCE_OCCURRENCES: usize = 5;

/// Type-specific hints that refine the efficiency factor and the wording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_type: Option<StallType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_nodes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlated_frame_drops: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct ScoringInput {
    pub detection_type: DetectionType,
    pub duration_ms: f64,
    pub occurrences: usize,
    pub frame_budget_ms: f64,
    pub trace_duration_ms: f64,
    #[builder(default)]
    #[serde(default)]
    pub context: ScoringContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub severity: Severity,
    pub impact_score: f64,
    pub confidence: Confidence,
    pub estimated_speedup_pct: f64,
    pub speedup_explanation: String,
    pub frame_budget_impact_pct: f64,
    pub risk_assessment: String,
}

/// Realistic fraction of the measured time a typical fix removes.
pub fn efficiency_factor(detection_type: DetectionType, context: &ScoringContext) -> f64 {
    match detection_type {
        DetectionType::LayoutThrashing => 0.7,
        DetectionType::ForcedReflow => 0.6,
        DetectionType::GpuStall => match context.stall_type {
            Some(StallType::Sync) => 0.6,
            Some(StallType::TextureUpload) => 0.5,
            Some(StallType::Raster) => 0.4,
            None => 0.5,
        },
        DetectionType::LongTask => 0.4,
        DetectionType::HeavyPaint => 0.35,
    }
}

pub fn calculate_score(input: &ScoringInput) -> ScoringResult {
    let duration_ms = non_negative(input.duration_ms);
    let frame_budget_ms = if input.frame_budget_ms.is_finite() && input.frame_budget_ms > 0.0 {
        input.frame_budget_ms
    } else {
        1000.0 / 60.0
    };
    let trace_duration_ms = if input.trace_duration_ms.is_finite() && input.trace_duration_ms > 0.0
    {
        input.trace_duration_ms
    } else {
        FALLBACK_TRACE_DURATION_MS
    };
    let total_budget_ms = trace_duration_ms.max(frame_budget_ms);

    let impact_score = impact_score(duration_ms, input.occurrences, frame_budget_ms);
    let confidence = confidence(duration_ms, input.occurrences);
    let efficiency = efficiency_factor(input.detection_type, &input.context);
    let estimated_speedup_pct =
        round_to(clamp_speedup(duration_ms / total_budget_ms * efficiency * 100.0), 2);
    let frame_budget_impact_pct = round_to(duration_ms / total_budget_ms * 100.0, 2);
    let budgets_consumed = duration_ms / frame_budget_ms;

    ScoringResult {
        severity: severity_for(impact_score),
        impact_score,
        confidence,
        estimated_speedup_pct,
        speedup_explanation: speedup_explanation(
            input.detection_type,
            duration_ms,
            total_budget_ms,
            efficiency,
            estimated_speedup_pct,
        ),
        frame_budget_impact_pct,
        risk_assessment: risk_assessment(input, budgets_consumed, impact_score),
    }
}

pub fn severity_for(impact_score: f64) -> Severity {
    if impact_score >= 75.0 {
        Severity::Critical
    } else if impact_score >= 50.0 {
        Severity::High
    } else if impact_score >= 25.0 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn impact_score(duration_ms: f64, occurrences: usize, frame_budget_ms: f64) -> f64 {
    let budgets = duration_ms / frame_budget_ms;
    let duration_part = 1.0 - (-budgets / DURATION_SCALE_BUDGETS).exp();
    let occurrence_part = 1.0 - (-(occurrences as f64) / OCCURRENCE_SCALE).exp();
    let score = 100.0 * (DURATION_WEIGHT * duration_part + OCCURRENCE_WEIGHT * occurrence_part);
    round_to(score.clamp(0.0, 100.0), 1)
}

fn confidence(duration_ms: f64, occurrences: usize) -> Confidence {
    if duration_ms >= HIGH_CONFIDENCE_MS {
        Confidence::High
    } else if duration_ms >= MEDIUM_CONFIDENCE_MS
        || occurrences >= RECURRENCE_CONFIDENCE_OCCURRENCES
    {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn clamp_speedup(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_SPEEDUP_PCT)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else if value == f64::INFINITY {
        f64::MAX
    } else {
        0.0
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}

fn speedup_explanation(
    detection_type: DetectionType,
    duration_ms: f64,
    total_budget_ms: f64,
    efficiency: f64,
    speedup_pct: f64,
) -> String {
    let capped = if speedup_pct >= MAX_SPEEDUP_PCT {
        format!(" (capped at {MAX_SPEEDUP_PCT:.0}%)")
    } else {
        String::new()
    };
    format!(
        "{} accounts for {:.1}ms of {:.1}ms of frame budget; assuming a fix removes {:.0}% of it, \
         rendering time drops by about {:.1}%{}",
        detection_type.label(),
        duration_ms,
        total_budget_ms,
        efficiency * 100.0,
        speedup_pct,
        capped
    )
}

fn risk_assessment(input: &ScoringInput, budgets_consumed: f64, impact_score: f64) -> String {
    let level = match severity_for(impact_score) {
        Severity::Critical => "critical",
        Severity::High => "high",
        Severity::Warning => "moderate",
        Severity::Info => "low",
    };
    let detail = match input.detection_type {
        DetectionType::GpuStall => match input.context.stall_type {
            Some(StallType::Sync) => "the main thread waits on GPU synchronization".to_string(),
            Some(StallType::TextureUpload) => "texture uploads block compositing".to_string(),
            Some(StallType::Raster) => "raster work delays frame presentation".to_string(),
            None => "GPU work blocks the main thread".to_string(),
        },
        DetectionType::LayoutThrashing | DetectionType::ForcedReflow => {
            match input.context.affected_nodes {
                Some(nodes) if nodes > 0 => {
                    format!("synchronous layout touches {nodes} nodes per burst")
                }
                _ => "script forces synchronous layout".to_string(),
            }
        }
        DetectionType::LongTask => match input.context.correlated_frame_drops {
            Some(drops) if drops > 0 => {
                format!("input is unresponsive and {drops} frames were dropped")
            }
            _ => "input is unresponsive while the task runs".to_string(),
        },
        DetectionType::HeavyPaint => match input.context.layer_count {
            Some(layers) if layers > 1 => format!("paint and raster span {layers} layers"),
            _ => "paint and raster exceed the frame budget".to_string(),
        },
    };
    format!(
        "{} risk: {} over {} occurrence(s), {:.1} frame budgets consumed",
        level, detail, input.occurrences, budgets_consumed
    )
}
