pub mod gpu_stall;
pub mod heavy_paint;
pub mod layout_thrash;
pub mod long_task;

pub use gpu_stall::GpuStallDetector;
pub use heavy_paint::HeavyPaintDetector;
pub use layout_thrash::LayoutThrashDetector;
pub use long_task::LongTaskDetector;

use crate::detector::Detector;
use crate::thresholds::Thresholds;

/// The built-in detectors configured with `thresholds`.
pub fn default_detectors(thresholds: &Thresholds) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(LayoutThrashDetector::new(thresholds.layout.clone())),
        Box::new(LongTaskDetector::new(thresholds.long_task.clone())),
        Box::new(GpuStallDetector::new(thresholds.gpu.clone())),
        Box::new(HeavyPaintDetector::new(thresholds.paint.clone())),
    ]
}
