//! Tunable detector thresholds.
//!
//! Every field has a serde default so a partial TOML table only overrides the
//! values it names.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub gpu: GpuThresholds,
    #[serde(default)]
    pub layout: LayoutThresholds,
    #[serde(default)]
    pub long_task: LongTaskThresholds,
    #[serde(default)]
    pub paint: PaintThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuThresholds {
    #[serde(default = "default_gpu_min_event_ms")]
    pub min_event_ms: f64,
    #[serde(default = "default_min_cluster_ms")]
    pub min_cluster_ms: f64,
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,
}

impl Default for GpuThresholds {
    fn default() -> Self {
        Self {
            min_event_ms: default_gpu_min_event_ms(),
            min_cluster_ms: default_min_cluster_ms(),
            min_occurrences: default_min_occurrences(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutThresholds {
    #[serde(default = "default_fine_min_event_ms")]
    pub min_event_ms: f64,
    /// Upper bound on the gap between chained layout events. The effective gap
    /// is also capped at a quarter of the frame budget.
    #[serde(default = "default_layout_max_gap_ms")]
    pub max_gap_ms: f64,
    #[serde(default = "default_min_chain_layouts")]
    pub min_chain_layouts: usize,
    #[serde(default = "default_min_cluster_ms")]
    pub min_cluster_ms: f64,
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,
}

impl Default for LayoutThresholds {
    fn default() -> Self {
        Self {
            min_event_ms: default_fine_min_event_ms(),
            max_gap_ms: default_layout_max_gap_ms(),
            min_chain_layouts: default_min_chain_layouts(),
            min_cluster_ms: default_min_cluster_ms(),
            min_occurrences: default_min_occurrences(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTaskThresholds {
    #[serde(default = "default_long_task_ms")]
    pub threshold_ms: f64,
}

impl Default for LongTaskThresholds {
    fn default() -> Self {
        Self {
            threshold_ms: default_long_task_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintThresholds {
    #[serde(default = "default_fine_min_event_ms")]
    pub min_event_ms: f64,
    /// Share of the frame budget paint + raster may take before a frame is heavy.
    #[serde(default = "default_frame_budget_ratio")]
    pub frame_budget_ratio: f64,
    #[serde(default = "default_min_heavy_frames")]
    pub min_heavy_frames: usize,
}

impl Default for PaintThresholds {
    fn default() -> Self {
        Self {
            min_event_ms: default_fine_min_event_ms(),
            frame_budget_ratio: default_frame_budget_ratio(),
            min_heavy_frames: default_min_heavy_frames(),
        }
    }
}

fn default_gpu_min_event_ms() -> f64 {
    1.0
}

fn default_fine_min_event_ms() -> f64 {
    0.1
}

fn default_min_cluster_ms() -> f64 {
    5.0
}

fn default_min_occurrences() -> usize {
    3
}

fn default_layout_max_gap_ms() -> f64 {
    2.0
}

fn default_min_chain_layouts() -> usize {
    3
}

fn default_long_task_ms() -> f64 {
    50.0
}

fn default_frame_budget_ratio() -> f64 {
    0.5
}

fn default_min_heavy_frames() -> usize {
    2
}
