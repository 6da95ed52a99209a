//! Capability-aware detector orchestration.
//!
//! The analyzer owns an ordered list of detectors. For every call it builds
//! the shared [`DetectionContext`], runs each detector whose capabilities are
//! available, isolates detector failures into warnings, and merges the
//! results in detector order.

use crate::capability::{Capability, CapabilitySet};
use crate::context::{DetectionContext, DEFAULT_FPS_TARGET};
use crate::detection::{Detection, Severity};
use crate::detector::Detector;
use crate::detectors::default_detectors;
use crate::error::AnalysisError;
use crate::frames::{FrameStats, FrameTimeline};
use crate::thresholds::Thresholds;
use bon::Builder;
use chrome_trace_format::TraceData;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct AnalyzeOptions {
    #[builder(default = DEFAULT_FPS_TARGET)]
    pub fps_target: f64,
    /// `None` means every capability is available.
    pub capabilities: Option<CapabilitySet>,
    #[builder(default)]
    pub parallel: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    DegradedAnalysis,
    DetectorFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
    pub affected_detectors: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_detections: usize,
    pub by_severity: SeverityCounts,
    pub trace_duration_ms: f64,
    pub frame_budget_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_thread: Option<String>,
    pub detectors_run: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub detections: Vec<Detection>,
    pub warnings: Vec<Warning>,
    pub frames: FrameStats,
    pub summary: AnalysisSummary,
}

impl AnalysisResult {
    /// Detections by impact score, highest first. Ties keep detector order.
    pub fn ranked(&self) -> Vec<&Detection> {
        let mut ranked: Vec<&Detection> = self.detections.iter().collect();
        ranked.sort_by(|a, b| b.metrics.impact_score.total_cmp(&a.metrics.impact_score));
        ranked
    }

    pub fn has_degraded_analysis(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| w.code == WarningCode::DegradedAnalysis)
    }
}

type DetectorOutcome = Result<Vec<Detection>, AnalysisError>;

#[derive(Default)]
pub struct Analyzer {
    detectors: Vec<Box<dyn Detector>>,
}

impl Analyzer {
    /// An analyzer with no detectors registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_detectors(thresholds: &Thresholds) -> Self {
        let mut analyzer = Self::new();
        for detector in default_detectors(thresholds) {
            analyzer.register(detector);
        }
        analyzer
    }

    /// Adds a detector. Detectors run by ascending priority, ties in
    /// registration order.
    pub fn register(&mut self, detector: Box<dyn Detector>) -> &mut Self {
        let position = self
            .detectors
            .partition_point(|d| d.priority() <= detector.priority());
        self.detectors.insert(position, detector);
        self
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn analyze(
        &self,
        trace: &TraceData,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisResult, AnalysisError> {
        let capabilities = options
            .capabilities
            .clone()
            .unwrap_or_else(CapabilitySet::full);
        let context = DetectionContext::from_trace(trace, options.fps_target, capabilities)?;

        let (eligible, skipped): (Vec<&dyn Detector>, Vec<&dyn Detector>) = self
            .detectors
            .iter()
            .map(|d| d.as_ref())
            .partition(|d| context.capabilities.is_superset_of(d.required_capabilities()));

        let mut warnings = Vec::new();
        if let Some(warning) = degraded_warning(&skipped, &context.capabilities) {
            tracing::warn!(
                detectors = ?warning.affected_detectors,
                "skipping detectors with missing capabilities"
            );
            warnings.push(warning);
        }

        let outcomes: Vec<DetectorOutcome> = if options.parallel && eligible.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = eligible
                    .iter()
                    .map(|&detector| {
                        let context = &context;
                        scope.spawn(move || run_detector(detector, trace, context))
                    })
                    .collect();
                handles
                    .into_iter()
                    .zip(&eligible)
                    .map(|(handle, detector)| {
                        handle.join().unwrap_or_else(|payload| {
                            Err(panic_error(detector.name(), payload.as_ref()))
                        })
                    })
                    .collect()
            })
        } else {
            eligible
                .iter()
                .map(|&detector| run_detector(detector, trace, &context))
                .collect()
        };

        let mut detections = Vec::new();
        for (detector, outcome) in eligible.iter().zip(outcomes) {
            match outcome {
                Ok(found) => detections.extend(found),
                Err(error) => {
                    tracing::warn!(detector = detector.name(), %error, "detector failed");
                    warnings.push(Warning {
                        code: WarningCode::DetectorFailed,
                        message: error.to_string(),
                        affected_detectors: vec![detector.name().to_string()],
                        suggestions: vec![
                            "the remaining detectors completed; re-run with RUST_LOG=debug for details"
                                .to_string(),
                        ],
                    });
                }
            }
        }

        let frames = FrameTimeline::from_trace(trace, &context).stats();
        let mut by_severity = SeverityCounts::default();
        for detection in &detections {
            by_severity.record(detection.severity);
        }
        let summary = AnalysisSummary {
            total_detections: detections.len(),
            by_severity,
            trace_duration_ms: context.trace_duration_ms(),
            frame_budget_ms: context.frame_budget_ms,
            main_thread: trace.find_main_thread().map(|thread| thread.to_string()),
            detectors_run: eligible.iter().map(|d| d.name().to_string()).collect(),
        };

        tracing::info!(
            detections = summary.total_detections,
            warnings = warnings.len(),
            frames = frames.total,
            "analysis complete"
        );
        Ok(AnalysisResult {
            detections,
            warnings,
            frames,
            summary,
        })
    }
}

fn run_detector(
    detector: &dyn Detector,
    trace: &TraceData,
    context: &DetectionContext,
) -> DetectorOutcome {
    tracing::debug!(detector = detector.name(), "running detector");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(trace, context)))
        .unwrap_or_else(|payload| Err(panic_error(detector.name(), payload.as_ref())));
    if let Ok(found) = &outcome {
        tracing::debug!(detector = detector.name(), detections = found.len(), "detector finished");
    }
    outcome
}

fn panic_error(detector: &'static str, payload: &(dyn Any + Send)) -> AnalysisError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    AnalysisError::Detector {
        detector,
        message: format!("panicked: {message}"),
    }
}

/// One warning covering every detector skipped for missing capabilities.
fn degraded_warning(skipped: &[&dyn Detector], available: &CapabilitySet) -> Option<Warning> {
    if skipped.is_empty() {
        return None;
    }
    let mut missing: Vec<Capability> = skipped
        .iter()
        .flat_map(|d| available.missing_from(d.required_capabilities()))
        .collect();
    missing.sort();
    missing.dedup();

    let effects: Vec<String> = missing
        .iter()
        .map(|c| format!("{c} ({})", c.effect_when_missing()))
        .collect();
    let affected_detectors: Vec<String> = skipped.iter().map(|d| d.name().to_string()).collect();
    let suggestions = missing
        .iter()
        .map(|c| format!("capture the trace with an adapter that provides {c}"))
        .collect();

    Some(Warning {
        code: WarningCode::DegradedAnalysis,
        message: format!(
            "analysis is degraded, missing capabilities: {}",
            effects.join("; ")
        ),
        affected_detectors,
        suggestions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionKind, HeavyPaint, Location};
    use crate::detector::build_detection;
    use crate::scoring::ScoringContext;
    use chrome_trace_format::{ThreadKey, TraceEvent};
    use rstest::*;

    struct Fixed {
        name: &'static str,
        priority: u32,
        required: &'static [Capability],
        duration_us: u64,
    }

    impl Detector for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn required_capabilities(&self) -> &'static [Capability] {
            self.required
        }

        fn detect(
            &self,
            _trace: &TraceData,
            context: &DetectionContext,
        ) -> Result<Vec<Detection>, AnalysisError> {
            let event = TraceEvent::complete("Paint", "", ThreadKey::new(1, 1), 0, self.duration_us);
            Ok(vec![build_detection(
                DetectionKind::HeavyPaint(HeavyPaint {
                    paint_time_ms: event.duration_ms(),
                    raster_time_ms: 0.0,
                    layer_count: 1,
                    heavy_frames: 1,
                }),
                self.name.to_string(),
                Location::default(),
                &[&event],
                context,
                ScoringContext::default(),
            )])
        }
    }

    struct Failing;

    impl Detector for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn priority(&self) -> u32 {
            5
        }

        fn required_capabilities(&self) -> &'static [Capability] {
            &[]
        }

        fn detect(&self, _: &TraceData, _: &DetectionContext) -> Result<Vec<Detection>, AnalysisError> {
            Err(AnalysisError::Detector {
                detector: "Failing",
                message: "bad payload".to_string(),
            })
        }
    }

    struct Panicking;

    impl Detector for Panicking {
        fn name(&self) -> &'static str {
            "Panicking"
        }

        fn priority(&self) -> u32 {
            6
        }

        fn required_capabilities(&self) -> &'static [Capability] {
            &[]
        }

        fn detect(&self, _: &TraceData, _: &DetectionContext) -> Result<Vec<Detection>, AnalysisError> {
            panic!("index out of range")
        }
    }

    fn fixed(name: &'static str, priority: u32, required: &'static [Capability], duration_us: u64) -> Box<dyn Detector> {
        Box::new(Fixed {
            name,
            priority,
            required,
            duration_us,
        })
    }

    #[fixture]
    fn analyzer() -> Analyzer {
        let mut analyzer = Analyzer::new();
        analyzer
            .register(fixed("Late", 30, &[Capability::GpuEvents], 1_000))
            .register(fixed("Early", 10, &[], 80_000))
            .register(fixed("AlsoEarly", 10, &[Capability::PaintEvents, Capability::GpuEvents], 2_000));
        analyzer
    }

    #[rstest]
    fn test_priority_then_registration_order(analyzer: Analyzer) {
        assert_eq!(analyzer.detector_names(), vec!["Early", "AlsoEarly", "Late"]);
        let result = analyzer
            .analyze(&TraceData::default(), &AnalyzeOptions::default())
            .expect("analyze");
        let names: Vec<&str> = result.detections.iter().map(|d| d.description.as_str()).collect();
        assert_eq!(names, vec!["Early", "AlsoEarly", "Late"]);
        assert!(result.warnings.is_empty());
        assert_eq!(result.ranked()[0].description, "Early");
    }

    #[rstest]
    fn test_single_degraded_warning(analyzer: Analyzer) {
        let options = AnalyzeOptions::builder()
            .capabilities(CapabilitySet::full().without(Capability::GpuEvents))
            .build();
        let result = analyzer.analyze(&TraceData::default(), &options).expect("analyze");
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        let warning = &result.warnings[0];
        assert_eq!(warning.code, WarningCode::DegradedAnalysis);
        assert_eq!(warning.affected_detectors, vec!["AlsoEarly", "Late"]);
        assert!(warning.message.contains("GPU_EVENTS"));
        assert!(!warning.message.contains("PAINT_EVENTS"));
        assert_eq!(result.summary.detectors_run, vec!["Early"]);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_failures_are_isolated(analyzer: Analyzer, #[case] parallel: bool) {
        let mut analyzer = analyzer;
        analyzer.register(Box::new(Failing)).register(Box::new(Panicking));
        let options = AnalyzeOptions::builder().parallel(parallel).build();
        let result = analyzer.analyze(&TraceData::default(), &options).expect("analyze");

        assert_eq!(result.detections.len(), 3);
        let failed: Vec<&str> = result
            .warnings
            .iter()
            .filter(|w| w.code == WarningCode::DetectorFailed)
            .flat_map(|w| w.affected_detectors.iter().map(String::as_str))
            .collect();
        assert_eq!(failed, vec!["Failing", "Panicking"]);
        assert!(result.warnings[1].message.contains("index out of range"));
    }

    #[rstest]
    fn test_parallel_matches_sequential(analyzer: Analyzer) {
        let trace = TraceData::new(vec![TraceEvent::complete("Paint", "", ThreadKey::new(1, 1), 0, 5_000)]);
        let sequential = analyzer.analyze(&trace, &AnalyzeOptions::default()).expect("analyze");
        let parallel = analyzer
            .analyze(&trace, &AnalyzeOptions::builder().parallel(true).build())
            .expect("analyze");
        assert_eq!(sequential, parallel);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-30.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn test_invalid_fps(analyzer: Analyzer, #[case] fps: f64) {
        let options = AnalyzeOptions::builder().fps_target(fps).build();
        let error = analyzer
            .analyze(&TraceData::default(), &options)
            .expect_err("invalid fps");
        assert!(matches!(error, AnalysisError::InvalidFpsTarget(_)));
    }

    #[rstest]
    fn test_summary_counts() {
        let mut analyzer = Analyzer::new();
        analyzer.register(fixed("Big", 1, &[], 400_000));
        let trace = TraceData::new(vec![
            TraceEvent::thread_name(ThreadKey::new(3, 4), "CrRendererMain"),
            TraceEvent::complete("Paint", "", ThreadKey::new(3, 4), 1_000, 2_000),
        ]);
        let result = analyzer.analyze(&trace, &AnalyzeOptions::default()).expect("analyze");
        assert_eq!(result.summary.total_detections, 1);
        assert_eq!(result.summary.main_thread.as_deref(), Some("3:4"));
        assert_eq!(result.summary.trace_duration_ms, 2.0);
        let counts = result.summary.by_severity;
        assert_eq!(counts.critical + counts.high + counts.warning + counts.info, 1);
    }
}
