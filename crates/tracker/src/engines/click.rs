use std::ops::ControlFlow;
use std::time::Duration;

use pulse_core::{monotonic_seconds, EngineError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{BeatCallback, BeatEngine, BeatFrame};

/// Settings for the simulated click track detector.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickTrackConfig {
    pub bpm: f64,
    /// Maximum timing error applied to each beat, in milliseconds.
    pub jitter_ms: f64,
    /// Probability that a beat is missed by the detector.
    pub dropout: f64,
    /// Stop after this many beats (detected or missed). `None` runs until cancelled.
    pub beats: Option<u64>,
    pub seed: u64,
    /// Analysis frames per second.
    pub frame_rate: f64,
    /// Sleep between frames so beats arrive in real time.
    pub realtime: bool,
    /// Report an engine failure once this many beats have passed.
    pub fail_after: Option<u64>,
}

impl Default for ClickTrackConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            jitter_ms: 0.0,
            dropout: 0.0,
            beats: None,
            seed: 0,
            frame_rate: 100.0,
            realtime: true,
            fail_after: None,
        }
    }
}

impl ClickTrackConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(EngineError::Failed(format!("invalid click tempo {}", self.bpm)));
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(EngineError::Failed(format!(
                "dropout must be between 0 and 1, got {}",
                self.dropout
            )));
        }
        if !(self.jitter_ms.is_finite() && self.jitter_ms >= 0.0) {
            return Err(EngineError::Failed(format!("invalid jitter {}ms", self.jitter_ms)));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(EngineError::Failed(format!("invalid frame rate {}", self.frame_rate)));
        }
        Ok(())
    }
}

/// Simulated detector producing a steady click with optional jitter and
/// missed beats.
pub struct ClickTrackEngine {
    config: ClickTrackConfig,
    rng: StdRng,
}

impl ClickTrackEngine {
    pub fn new(config: ClickTrackConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &ClickTrackConfig {
        &self.config
    }

    fn beat_time(&mut self, start: f64, period: f64, beat: u64) -> f64 {
        let jitter = self.config.jitter_ms / 1000.0;
        let offset = if jitter > 0.0 {
            self.rng.random_range(-jitter..=jitter)
        } else {
            0.0
        };
        start + period * beat as f64 + offset
    }
}

impl BeatEngine for ClickTrackEngine {
    fn name(&self) -> &str {
        "click"
    }

    fn run(&mut self, on_beats: &mut BeatCallback<'_>) -> Result<(), EngineError> {
        self.config.validate()?;

        let period = 60.0 / self.config.bpm;
        let frame_period = 1.0 / self.config.frame_rate;
        let start = monotonic_seconds();
        log::info!(
            "Click track at {:.2} BPM, jitter {:.1}ms, dropout {:.0}%",
            self.config.bpm,
            self.config.jitter_ms,
            self.config.dropout * 100.0
        );

        let mut beat: u64 = 1;
        let mut next_beat = self.beat_time(start, period, beat);
        let mut frame_index: u64 = 0;
        let mut detected = Vec::new();

        loop {
            frame_index += 1;
            let frame_end = start + frame_period * frame_index as f64;

            if self.config.realtime {
                let remaining = frame_end - monotonic_seconds();
                if remaining > 0.0 {
                    std::thread::sleep(Duration::from_secs_f64(remaining));
                }
            }

            detected.clear();
            while next_beat <= frame_end {
                if self.config.fail_after.is_some_and(|n| beat > n) {
                    return Err(EngineError::Failed(format!(
                        "click track failed after {} beats",
                        beat - 1
                    )));
                }
                if self.rng.random_bool(self.config.dropout) {
                    log::trace!("Dropping beat {}", beat);
                } else {
                    detected.push(next_beat);
                }
                if self.config.beats.is_some_and(|n| beat >= n) {
                    let frame = BeatFrame {
                        beats: &detected,
                        frame_index,
                    };
                    let _ = on_beats(frame);
                    return Ok(());
                }
                beat += 1;
                next_beat = self.beat_time(start, period, beat);
            }

            let frame = BeatFrame {
                beats: &detected,
                frame_index,
            };
            if let ControlFlow::Break(()) = on_beats(frame) {
                return Ok(());
            }
        }
    }
}
