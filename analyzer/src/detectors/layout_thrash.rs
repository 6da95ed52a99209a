//! Layout thrashing and forced reflow detection.
//!
//! Script that interleaves style writes with layout reads forces Blink to run
//! layout synchronously, often many times per frame. On the main thread this
//! shows up as bursts of `Layout` events (usually with style recalculation in
//! between) separated by almost no idle time.

use crate::capability::Capability;
use crate::context::DetectionContext;
use crate::detection::{Detection, DetectionKind, ForcedReflow, LayoutThrashing, Location};
use crate::detector::{build_detection, round_ms, ClusterMap, Detector};
use crate::error::AnalysisError;
use crate::payload::{parse_stack_trace, value_as_u64, ScriptFrame};
use crate::scoring::ScoringContext;
use crate::thresholds::LayoutThresholds;
use chrome_trace_format::{TraceData, TraceEvent};
use std::collections::HashMap;

pub const NAME: &str = "LayoutThrashDetector";

const LAYOUT_EVENTS: &[&str] = &["Layout"];

const STYLE_EVENTS: &[&str] = &["UpdateLayoutTree", "RecalculateStyles", "RecalcStyle"];

pub struct LayoutThrashDetector {
    thresholds: LayoutThresholds,
}

impl LayoutThrashDetector {
    pub fn new(thresholds: LayoutThresholds) -> Self {
        Self { thresholds }
    }

    fn max_gap_us(&self, context: &DetectionContext) -> u64 {
        let gap_ms = self
            .thresholds
            .max_gap_ms
            .min(context.frame_budget_ms / 4.0)
            .max(0.0);
        (gap_ms * 1000.0) as u64
    }
}

impl Default for LayoutThrashDetector {
    fn default() -> Self {
        Self::new(LayoutThresholds::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutOp {
    /// Style recalculation, triggered by a style write.
    Write,
    /// Layout, triggered by a geometry read.
    Read,
}

fn layout_op(event: &TraceEvent) -> Option<LayoutOp> {
    let name = event.name.as_str();
    if LAYOUT_EVENTS.contains(&name) {
        Some(LayoutOp::Read)
    } else if STYLE_EVENTS.contains(&name) {
        Some(LayoutOp::Write)
    } else {
        None
    }
}

/// What a layout event's payload says about its origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutPayload {
    pub selector: Option<String>,
    pub stack: Vec<ScriptFrame>,
    pub affected_nodes: u64,
}

impl LayoutPayload {
    pub fn extract(event: &TraceEvent) -> Self {
        let selector = event
            .arg_path(&["beginData", "selector"])
            .or_else(|| event.arg("selector"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let stack = event
            .arg_path(&["beginData", "stackTrace"])
            .or_else(|| event.arg("stackTrace"))
            .map(parse_stack_trace)
            .unwrap_or_default();
        let affected_nodes = ["dirtyObjects", "totalObjects"]
            .iter()
            .find_map(|key| {
                event
                    .arg_path(&["beginData", *key])
                    .or_else(|| event.arg(key))
                    .and_then(value_as_u64)
            })
            .unwrap_or(0);
        Self {
            selector,
            stack,
            affected_nodes,
        }
    }

    /// Forced by script when a JavaScript stack is attached.
    pub fn is_script_forced(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn call_site(&self) -> Option<&ScriptFrame> {
        self.stack.first()
    }

    /// Selector, else the top script frame, else `unknown`.
    pub fn identity(&self) -> String {
        self.selector
            .clone()
            .or_else(|| self.call_site().map(ScriptFrame::call_site))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn location(&self) -> Location {
        match (&self.selector, self.call_site()) {
            (Some(selector), frame) => Location {
                selector: Some(selector.clone()),
                file: frame.and_then(ScriptFrame::file),
                line: frame.and_then(|f| f.line),
                column: frame.and_then(|f| f.column),
                ..Location::default()
            },
            (None, Some(frame)) => Location {
                file: frame.file(),
                line: frame.line,
                column: frame.column,
                ..Location::default()
            },
            (None, None) => Location::default(),
        }
    }
}

#[derive(Debug, Default)]
struct BurstStats {
    bursts: usize,
    write_read_cycles: usize,
}

impl BurstStats {
    fn pattern(&self, reads: usize) -> String {
        if self.write_read_cycles > 0 {
            format!(
                "{} style write -> layout read cycle(s) across {} burst(s)",
                self.write_read_cycles, self.bursts
            )
        } else {
            format!("{} back-to-back layout read(s) across {} burst(s)", reads, self.bursts)
        }
    }
}

/// Splits time-sorted events into chains separated by gaps of at least `max_gap_us`.
fn chains<'t>(events: &[&'t TraceEvent], max_gap_us: u64) -> Vec<Vec<&'t TraceEvent>> {
    let mut chains: Vec<Vec<&TraceEvent>> = Vec::new();
    let mut chain_end = 0u64;
    for &event in events {
        match chains.last_mut() {
            Some(chain) if event.ts.saturating_sub(chain_end) < max_gap_us => {
                chain.push(event);
                chain_end = chain_end.max(event.end_us());
            }
            _ => {
                chains.push(vec![event]);
                chain_end = event.end_us();
            }
        }
    }
    chains
}

fn write_read_cycles(chain: &[&TraceEvent]) -> usize {
    chain
        .windows(2)
        .filter(|pair| {
            layout_op(pair[0]) == Some(LayoutOp::Write) && layout_op(pair[1]) == Some(LayoutOp::Read)
        })
        .count()
}

impl Detector for LayoutThrashDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u32 {
        10
    }

    fn required_capabilities(&self) -> &'static [Capability] {
        &[Capability::DomSignals]
    }

    fn detect(
        &self,
        trace: &TraceData,
        context: &DetectionContext,
    ) -> Result<Vec<Detection>, AnalysisError> {
        let Some(main_thread) = trace.find_main_thread() else {
            return Ok(Vec::new());
        };

        let events: Vec<&TraceEvent> = trace
            .thread_events(main_thread)
            .into_iter()
            .filter(|e| layout_op(e).is_some())
            .filter(|e| e.duration_ms() >= self.thresholds.min_event_ms)
            .collect();

        let mut thrash: ClusterMap<String, LayoutPayload> = ClusterMap::new();
        let mut burst_stats: HashMap<String, BurstStats> = HashMap::new();
        let mut forced: ClusterMap<String, LayoutPayload> = ClusterMap::new();

        for chain in chains(&events, self.max_gap_us(context)) {
            let reads: Vec<&TraceEvent> = chain
                .iter()
                .copied()
                .filter(|e| layout_op(e) == Some(LayoutOp::Read))
                .collect();

            if reads.len() >= self.thresholds.min_chain_layouts.max(1) {
                let payloads: Vec<LayoutPayload> =
                    reads.iter().map(|e| LayoutPayload::extract(e)).collect();
                let lead = payloads
                    .iter()
                    .find(|p| p.selector.is_some() || p.is_script_forced())
                    .unwrap_or(&payloads[0])
                    .clone();
                let identity = lead.identity();

                let stats = burst_stats.entry(identity.clone()).or_default();
                stats.bursts += 1;
                stats.write_read_cycles += write_read_cycles(&chain);

                for (event, payload) in reads.into_iter().zip(payloads) {
                    let meta = if payload.selector.is_some() || payload.is_script_forced() {
                        Some(payload)
                    } else {
                        None
                    };
                    thrash.add(identity.clone(), event, meta);
                }
                continue;
            }

            for event in reads {
                let payload = LayoutPayload::extract(event);
                if payload.is_script_forced() {
                    forced.add(payload.identity(), event, Some(payload));
                }
            }
        }

        let mut detections: Vec<(u64, Detection)> = Vec::new();

        for cluster in thrash.into_clusters() {
            if !cluster.retained(self.thresholds.min_cluster_ms, self.thresholds.min_occurrences) {
                continue;
            }
            let first_ts = cluster.events.first().map_or(0, |e| e.ts);
            let affected_nodes: u64 = cluster
                .events
                .iter()
                .map(|e| LayoutPayload::extract(e).affected_nodes)
                .sum();
            let reflow_cost_ms = round_ms(cluster.total_ms);
            let stats = burst_stats.remove(&cluster.key).unwrap_or_default();
            let location = cluster.meta.as_ref().map(LayoutPayload::location).unwrap_or_default();
            let description = format!(
                "Layout thrashing on {}: {} forced reflow(s) in {} burst(s) costing {:.1}ms",
                cluster.key,
                cluster.events.len(),
                stats.bursts,
                reflow_cost_ms
            );
            let detection = build_detection(
                DetectionKind::LayoutThrashing(LayoutThrashing {
                    read_write_pattern: stats.pattern(cluster.events.len()),
                    selector: cluster.key,
                    reflow_cost_ms,
                    affected_nodes,
                }),
                description,
                location,
                &cluster.events,
                context,
                ScoringContext {
                    affected_nodes: Some(affected_nodes),
                    ..ScoringContext::default()
                },
            );
            detections.push((first_ts, detection));
        }

        for cluster in forced.into_clusters() {
            if !cluster.retained(self.thresholds.min_cluster_ms, self.thresholds.min_occurrences) {
                continue;
            }
            let first_ts = cluster.events.first().map_or(0, |e| e.ts);
            let affected_nodes: u64 = cluster
                .events
                .iter()
                .map(|e| LayoutPayload::extract(e).affected_nodes)
                .sum();
            let reflow_cost_ms = round_ms(cluster.total_ms);
            let call_site = cluster
                .meta
                .as_ref()
                .and_then(|p| p.call_site().map(ScriptFrame::call_site));
            let location = cluster.meta.as_ref().map(LayoutPayload::location).unwrap_or_default();
            let description = format!(
                "Forced synchronous layout from {}: {} reflow(s) costing {:.1}ms",
                cluster.key,
                cluster.events.len(),
                reflow_cost_ms
            );
            let detection = build_detection(
                DetectionKind::ForcedReflow(ForcedReflow {
                    selector: cluster.key,
                    reflow_cost_ms,
                    affected_nodes,
                    call_site,
                }),
                description,
                location,
                &cluster.events,
                context,
                ScoringContext {
                    affected_nodes: Some(affected_nodes),
                    ..ScoringContext::default()
                },
            );
            detections.push((first_ts, detection));
        }

        detections.sort_by_key(|(first_ts, _)| *first_ts);
        tracing::debug!(detector = NAME, detections = detections.len(), "layout analysis complete");
        Ok(detections.into_iter().map(|(_, d)| d).collect())
    }
}
