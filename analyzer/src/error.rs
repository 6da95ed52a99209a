use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("fps target must be a positive finite number, got {0}")]
    InvalidFpsTarget(f64),

    #[error("detector {detector} failed: {message}")]
    Detector {
        detector: &'static str,
        message: String,
    },
}
