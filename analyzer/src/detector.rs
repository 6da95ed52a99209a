use crate::capability::Capability;
use crate::context::DetectionContext;
use crate::detection::{Detection, DetectionKind, DetectionMetrics, Evidence, Location};
use crate::error::AnalysisError;
use crate::scoring::{calculate_score, ScoringContext, ScoringInput};
use chrome_trace_format::{TraceData, TraceEvent};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::hash::Hash;

/// A trace analyzer for one family of rendering issues.
///
/// Detectors are pure functions of `(trace, context)`: they hold no mutable
/// state and may run concurrently.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> u32;

    fn required_capabilities(&self) -> &'static [Capability];

    fn detect(
        &self,
        trace: &TraceData,
        context: &DetectionContext,
    ) -> Result<Vec<Detection>, AnalysisError>;
}

/// Accumulated occurrences of one issue identity.
#[derive(Debug)]
pub struct Cluster<'t, K, M> {
    pub key: K,
    pub events: Vec<&'t TraceEvent>,
    pub total_ms: f64,
    /// First non-empty auxiliary metadata seen for this cluster.
    pub meta: Option<M>,
}

impl<K, M> Cluster<'_, K, M> {
    pub fn occurrences(&self) -> usize {
        self.events.len()
    }

    pub fn retained(&self, min_total_ms: f64, min_occurrences: usize) -> bool {
        self.total_ms >= min_total_ms || self.occurrences() >= min_occurrences
    }
}

/// Clusters keyed by identity, kept in first-insertion order.
pub struct ClusterMap<'t, K, M> {
    index: HashMap<K, usize>,
    clusters: Vec<Cluster<'t, K, M>>,
}

impl<'t, K, M> Default for ClusterMap<'t, K, M> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            clusters: Vec::new(),
        }
    }
}

impl<'t, K: Hash + Eq + Clone, M> ClusterMap<'t, K, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, event: &'t TraceEvent, meta: Option<M>) {
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                self.clusters.push(Cluster {
                    key: key.clone(),
                    events: Vec::new(),
                    total_ms: 0.0,
                    meta: None,
                });
                self.index.insert(key, self.clusters.len() - 1);
                self.clusters.len() - 1
            }
        };
        let cluster = &mut self.clusters[position];
        cluster.events.push(event);
        cluster.total_ms += event.duration_ms();
        if cluster.meta.is_none() {
            cluster.meta = meta;
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn into_clusters(self) -> Vec<Cluster<'t, K, M>> {
        self.clusters
    }
}

/// Non-metadata events sorted by timestamp. At equal timestamps the longer
/// span comes first, so parents precede the spans nested in them.
pub fn sorted_events(trace: &TraceData) -> Vec<&TraceEvent> {
    let mut events: Vec<&TraceEvent> = trace.timed_events().collect();
    events.sort_by_key(|e| (e.ts, Reverse(e.duration_us())));
    events
}

/// Scores the folded events and assembles the detection.
///
/// `duration_ms` and `occurrences` always come from `events`, so every
/// detection reports exactly what was folded into it.
pub fn build_detection(
    kind: DetectionKind,
    description: String,
    location: Location,
    events: &[&TraceEvent],
    context: &DetectionContext,
    scoring_context: ScoringContext,
) -> Detection {
    let duration_ms: f64 = events.iter().map(|e| e.duration_ms()).sum();
    let occurrences = events.len();
    let input = ScoringInput::builder()
        .detection_type(kind.detection_type())
        .duration_ms(duration_ms)
        .occurrences(occurrences)
        .frame_budget_ms(context.frame_budget_ms)
        .trace_duration_ms(context.scoring_trace_duration_ms())
        .context(scoring_context)
        .build();
    let score = calculate_score(&input);

    Detection {
        kind,
        severity: score.severity,
        description,
        location,
        metrics: DetectionMetrics {
            duration_ms: round_ms(duration_ms),
            occurrences,
            impact_score: score.impact_score,
            confidence: score.confidence,
            estimated_speedup_pct: score.estimated_speedup_pct,
            speedup_explanation: score.speedup_explanation,
            frame_budget_impact_pct: score.frame_budget_impact_pct,
            risk_assessment: score.risk_assessment,
        },
        evidence: Evidence::from_events(events.iter().copied()),
    }
}

/// Rounds to microsecond precision for reporting.
pub fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionType, GpuStall, StallType};
    use chrome_trace_format::ThreadKey;

    #[test]
    fn test_cluster_map_keeps_first_insertion_order() {
        let thread = ThreadKey::new(1, 1);
        let events = [
            TraceEvent::complete("a", "", thread, 0, 2_000),
            TraceEvent::complete("b", "", thread, 10, 1_000),
            TraceEvent::complete("a", "", thread, 20, 3_000),
        ];
        let mut clusters: ClusterMap<&str, u32> = ClusterMap::new();
        clusters.add("a", &events[0], None);
        clusters.add("b", &events[1], Some(7));
        clusters.add("a", &events[2], Some(9));

        let clusters = clusters.into_clusters();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].key, "a");
        assert_eq!(clusters[0].occurrences(), 2);
        assert_eq!(clusters[0].total_ms, 5.0);
        assert_eq!(clusters[0].meta, Some(9));
        assert_eq!(clusters[1].meta, Some(7));
        assert!(clusters[0].retained(5.0, 3));
        assert!(!clusters[1].retained(5.0, 3));
    }

    #[test]
    fn test_build_detection_uses_folded_events() {
        let thread = ThreadKey::new(1, 1);
        let events = [
            TraceEvent::complete("Finish", "gpu", thread, 0, 4_000),
            TraceEvent::complete("Finish", "gpu", thread, 100, 2_500),
        ];
        let refs: Vec<&TraceEvent> = events.iter().collect();
        let context = DetectionContext::builder()
            .trace_start_us(0)
            .trace_end_us(1_000_000)
            .frame_budget_ms(16.0)
            .build();
        let detection = build_detection(
            DetectionKind::GpuStall(GpuStall {
                element: "unknown".to_string(),
                stall_ms: 6.5,
                occurrences: 2,
                stall_type: StallType::Sync,
                layer_info: None,
            }),
            "sync".to_string(),
            Location::default(),
            &refs,
            &context,
            ScoringContext::default(),
        );
        assert_eq!(detection.detection_type(), DetectionType::GpuStall);
        assert_eq!(detection.metrics.duration_ms, 6.5);
        assert_eq!(detection.metrics.occurrences, 2);
        assert_eq!(detection.evidence.total_events, 2);
    }
}
