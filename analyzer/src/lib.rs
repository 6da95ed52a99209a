//! Trace analysis engine: turns a Chrome trace into ranked rendering
//! performance detections.
//!
//! ```no_run
//! use analyzer::{Analyzer, AnalyzeOptions, Thresholds};
//! use chrome_trace_format::TraceData;
//!
//! let trace = TraceData::from_path("trace.json")?;
//! let result = Analyzer::with_default_detectors(&Thresholds::default())
//!     .analyze(&trace, &AnalyzeOptions::default())?;
//! for detection in result.ranked() {
//!     println!("{:?} {}", detection.severity, detection.description);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analyzer;
pub mod capability;
pub mod context;
pub mod detection;
pub mod detector;
pub mod detectors;
pub mod error;
pub mod frames;
pub mod payload;
pub mod scoring;
pub mod thresholds;

pub use crate::analyzer::{
    AnalysisResult, AnalysisSummary, AnalyzeOptions, Analyzer, SeverityCounts, Warning,
    WarningCode,
};
pub use capability::{Capability, CapabilitySet};
pub use context::{frame_budget_ms, DetectionContext, DEFAULT_FPS_TARGET};
pub use detection::{
    Confidence, Detection, DetectionKind, DetectionMetrics, DetectionType, Evidence, Location,
    Severity, StallType,
};
pub use detector::Detector;
pub use error::AnalysisError;
pub use frames::{FrameStats, FrameTimeline};
pub use scoring::{calculate_score, ScoringContext, ScoringInput, ScoringResult};
pub use thresholds::Thresholds;
