use thiserror::Error;

/// Failure raised inside a beat engine's execution context.
///
/// Carried across the thread boundary as the terminal bridge message, so it
/// holds owned strings rather than the engine's own error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("beat engine failed: {0}")]
    Failed(String),

    #[error("beat engine panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced to callers of the tempo engine.
///
/// Noise and silence gaps are not errors; the estimator reports them as
/// `Observation::Ignore` and `Observation::Reset`.
#[derive(Debug, Error)]
pub enum TempoError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    EngineFailure(#[from] EngineError),

    #[error("invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("event bridge disconnected without a terminal message")]
    BridgeDisconnected,
}

/// Reject BPM values the scheduler must never see.
pub fn validate_bpm(bpm: f64) -> Result<f64, TempoError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(TempoError::InvalidTempo(bpm))
    }
}
