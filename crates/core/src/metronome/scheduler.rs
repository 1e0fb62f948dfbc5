use serde::{Deserialize, Serialize};

use crate::config::TrackerSettings;
use crate::error::{validate_bpm, TempoError};
use crate::rhythm::Prediction;

/// Where the scheduler's current tempo came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TempoSource {
    /// Beat detection predictions.
    #[default]
    Detected,
    /// Manual BPM override.
    Manual,
}

impl TempoSource {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Detected => "Detected",
            Self::Manual => "Manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No tempo known yet.
    Idle,
    /// Waiting for `next_tick_epoch`.
    Waiting,
    /// Emitting a tick; only observable from inside `poll`.
    Ticking,
    /// Shut down until restarted with a fresh BPM.
    Stopped,
}

/// Snapshot of the scheduler's timing state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_tick_epoch: f64,
    pub step_index: usize,
    pub bpm: f64,
    pub tempo_source: TempoSource,
}

/// One metronome tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub step_index: usize,
    /// Epoch seconds at which the tick fired.
    pub epoch: f64,
    pub bpm: f64,
}

/// Self-correcting periodic scheduler.
///
/// Predictions overwrite the next deadline as they arrive; between
/// predictions the scheduler free-runs at the last known BPM. The caller owns
/// the waiting: it sleeps until [`next_deadline`](Self::next_deadline) and
/// calls [`poll`](Self::poll).
#[derive(Debug, Clone)]
pub struct MetronomeScheduler {
    state: SchedulerState,
    schedule: Option<ScheduleState>,
    max_steps: usize,
    skew: f64,
}

impl MetronomeScheduler {
    pub fn new(max_steps: usize, skew_seconds: f64) -> Self {
        Self {
            state: SchedulerState::Idle,
            schedule: None,
            max_steps: max_steps.max(1),
            skew: if skew_seconds.is_finite() { skew_seconds } else { 0.0 },
        }
    }

    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self::new(settings.max_steps, settings.skew_seconds())
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn schedule(&self) -> Option<ScheduleState> {
        self.schedule
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn skew_seconds(&self) -> f64 {
        self.skew
    }

    /// Epoch at which `poll` will next produce a tick, while waiting.
    pub fn next_deadline(&self) -> Option<f64> {
        match self.state {
            SchedulerState::Waiting => self.schedule.map(|s| s.next_tick_epoch),
            _ => None,
        }
    }

    /// Reschedule from a beat prediction.
    pub fn apply_prediction(&mut self, prediction: &Prediction) -> Result<(), TempoError> {
        let bpm = validate_bpm(prediction.bpm)?;
        if !prediction.next_beat_epoch.is_finite() {
            return Err(TempoError::InvalidTempo(bpm));
        }
        self.schedule_at(bpm, prediction.next_beat_epoch, TempoSource::Detected);
        Ok(())
    }

    /// Manual tempo change; takes effect at the next wait check.
    pub fn override_bpm(&mut self, bpm: f64, now: f64) -> Result<(), TempoError> {
        let bpm = validate_bpm(bpm)?;
        self.schedule_at(bpm, now + 60.0 / bpm, TempoSource::Manual);
        Ok(())
    }

    pub fn set_skew(&mut self, skew_seconds: f64) -> Result<(), TempoError> {
        if !skew_seconds.is_finite() {
            return Err(TempoError::Configuration(format!(
                "skew must be finite, got {}",
                skew_seconds
            )));
        }
        self.skew = skew_seconds;
        Ok(())
    }

    /// Emit a tick if the deadline has passed.
    pub fn poll(&mut self, now: f64) -> Option<Tick> {
        if self.state != SchedulerState::Waiting {
            return None;
        }
        let schedule = self.schedule.as_mut()?;
        if now < schedule.next_tick_epoch {
            return None;
        }

        self.state = SchedulerState::Ticking;
        schedule.step_index = (schedule.step_index + 1) % self.max_steps;
        let tick = Tick {
            step_index: schedule.step_index,
            epoch: now,
            bpm: schedule.bpm,
        };
        schedule.next_tick_epoch = now + 60.0 / schedule.bpm + self.skew;
        self.state = SchedulerState::Waiting;

        Some(tick)
    }

    pub fn stop(&mut self) {
        if self.state != SchedulerState::Stopped {
            log::info!("Metronome stopped");
        }
        self.state = SchedulerState::Stopped;
    }

    /// Leave `Stopped` (or any state) and start over from a fresh BPM.
    pub fn restart(&mut self, bpm: f64, now: f64) -> Result<(), TempoError> {
        let bpm = validate_bpm(bpm)?;
        self.state = SchedulerState::Idle;
        self.schedule = None;
        self.override_bpm(bpm, now)
    }

    fn schedule_at(&mut self, bpm: f64, base_epoch: f64, tempo_source: TempoSource) {
        let next_tick_epoch = base_epoch + self.skew;
        match self.state {
            SchedulerState::Stopped => {
                log::debug!("Metronome stopped, ignoring {} tempo {:.2}", tempo_source.display_name(), bpm);
            }
            SchedulerState::Idle => {
                self.schedule = Some(ScheduleState {
                    next_tick_epoch,
                    // The first tick lands on step 0.
                    step_index: self.max_steps - 1,
                    bpm,
                    tempo_source,
                });
                self.state = SchedulerState::Waiting;
                log::info!("Metronome started at {:.2} BPM ({})", bpm, tempo_source.display_name());
            }
            SchedulerState::Waiting | SchedulerState::Ticking => {
                if let Some(schedule) = self.schedule.as_mut() {
                    schedule.next_tick_epoch = next_tick_epoch;
                    schedule.bpm = bpm;
                    schedule.tempo_source = tempo_source;
                }
            }
        }
    }
}
