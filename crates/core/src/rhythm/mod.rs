pub mod estimator;
pub mod predictor;

pub use estimator::{phase_letter, CorrectedInterval, EstimatorConfig, IntervalEstimator, Observation};
pub use predictor::{BeatPredictor, Prediction, DRIFT_DAMPING};
