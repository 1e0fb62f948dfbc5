use serde::{Deserialize, Serialize};

use crate::error::{validate_bpm, TempoError};

/// Fraction of the last prediction error fed into the next prediction.
pub const DRIFT_DAMPING: f64 = 0.5;

/// Tempo estimate and the expected wall-clock instant of the next beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub bpm: f64,
    /// Seconds since the Unix epoch.
    pub next_beat_epoch: f64,
    /// Previous prediction minus the observed beat time, in seconds.
    pub delta: f64,
}

/// First-order phase-locked loop over corrected beat intervals.
///
/// Each prediction is nudged by half the error of the previous one, which
/// converges on the detector's phase without chasing single noisy samples.
#[derive(Debug, Clone, Default)]
pub struct BeatPredictor {
    last_predicted_epoch: Option<f64>,
    delta: f64,
}

impl BeatPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predict the next beat from a corrected interval observed at `now`.
    pub fn on_interval(
        &mut self,
        corrected_interval: f64,
        now: f64,
    ) -> Result<Prediction, TempoError> {
        if !corrected_interval.is_finite() || corrected_interval <= 0.0 {
            return Err(TempoError::InvalidTempo(corrected_interval));
        }
        let bpm = validate_bpm(60.0 / corrected_interval)?;

        if let Some(last) = self.last_predicted_epoch {
            self.delta = last - now;
        }

        let next_beat_epoch = now + corrected_interval + self.delta * DRIFT_DAMPING;
        self.last_predicted_epoch = Some(next_beat_epoch);

        Ok(Prediction {
            bpm,
            next_beat_epoch,
            delta: self.delta,
        })
    }

    /// Drop the drift history, as after a silence gap.
    pub fn reset(&mut self) {
        self.last_predicted_epoch = None;
        self.delta = 0.0;
    }

    pub fn last_predicted_epoch(&self) -> Option<f64> {
        self.last_predicted_epoch
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}
