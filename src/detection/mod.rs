/// Threshold rules and the anomaly detector that opens incidents
pub mod detector;
pub mod rules;

pub use detector::AnomalyDetector;
pub use rules::{Breach, DetectionRule, LatencyRule, ServerErrorRule};
