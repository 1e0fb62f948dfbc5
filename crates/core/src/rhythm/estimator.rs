//! Rolling-average beat interval estimation with missed-beat compensation.
//!
//! Beat detectors drop beats on quiet passages and double-trigger on busy
//! ones. The estimator keeps a short window of corrected intervals and, for
//! every new raw interval, estimates how many true beats elapsed since the
//! previous detection by rounding against the window average. Dividing the
//! raw interval by that count recovers the underlying beat grid, and the
//! count also advances the phase so receivers stay aligned to bars.

use std::collections::VecDeque;

use crate::config::TrackerSettings;

/// Parameters of an [`IntervalEstimator`], in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub min_period: f64,
    pub max_period: f64,
    pub reset_multiplier: f64,
    pub window_capacity: usize,
    pub phase_modulus: u32,
}

impl EstimatorConfig {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            min_period: settings.min_period(),
            max_period: settings.max_period(),
            reset_multiplier: settings.reset_multiplier,
            window_capacity: settings.window_capacity.max(1),
            phase_modulus: settings.phase_modulus.max(1),
        }
    }

    /// Raw intervals longer than this are treated as a silence gap.
    pub fn reset_threshold(&self) -> f64 {
        self.reset_multiplier * self.max_period
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::from_settings(&TrackerSettings::default())
    }
}

/// An accepted detection after missed-beat correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectedInterval {
    /// Interval of one true beat, in seconds.
    pub interval: f64,
    /// Phase after this detection, in `[0, phase_modulus)`.
    pub phase: u32,
    /// Beats the detector is estimated to have missed before this one.
    pub beats_skipped: u32,
}

/// Outcome of feeding one raw interval to the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Beat(CorrectedInterval),
    /// Silence gap: window cleared, phase back to zero.
    Reset,
    /// Warm-up sample or detector noise; no prediction.
    Ignore,
}

/// Stateful interval estimator for one continuous tracking session.
#[derive(Debug, Clone)]
pub struct IntervalEstimator {
    config: EstimatorConfig,
    /// Corrected intervals, oldest at the front.
    window: VecDeque<f64>,
    phase: u32,
    baseline: Option<f64>,
}

impl IntervalEstimator {
    /// A zero window capacity or phase modulus is raised to one.
    pub fn new(mut config: EstimatorConfig) -> Self {
        config.window_capacity = config.window_capacity.max(1);
        config.phase_modulus = config.phase_modulus.max(1);
        Self {
            window: VecDeque::with_capacity(config.window_capacity),
            config,
            phase: 0,
            baseline: None,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn window(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Mean of the interval window, if it holds any samples.
    pub fn average(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
        }
    }

    /// Timestamp of the last observed beat.
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Observe a beat at a monotonic timestamp in seconds.
    ///
    /// The first beat of a session only establishes the baseline. The
    /// baseline moves to `timestamp` whatever the outcome.
    pub fn observe_beat(&mut self, timestamp: f64) -> Observation {
        let observation = match self.baseline {
            Some(previous) => self.observe(timestamp - previous),
            None => {
                self.clear_window();
                Observation::Reset
            }
        };
        self.baseline = Some(timestamp);
        observation
    }

    /// Observe a raw inter-beat interval in seconds.
    pub fn observe(&mut self, raw_interval: f64) -> Observation {
        if !raw_interval.is_finite() || raw_interval <= 0.0 {
            return Observation::Ignore;
        }

        if raw_interval > self.config.reset_threshold() {
            self.clear_window();
            return Observation::Reset;
        }

        let average = match self.average() {
            Some(average) => average,
            None => {
                self.push(raw_interval);
                return Observation::Ignore;
            }
        };

        if raw_interval < self.config.min_period {
            return Observation::Ignore;
        }

        let multiple = (raw_interval / average).round().max(1.0);
        let interval = raw_interval / multiple;
        let multiple = multiple as u64;
        self.push(interval);
        self.phase = ((self.phase as u64 + multiple) % self.config.phase_modulus as u64) as u32;

        Observation::Beat(CorrectedInterval {
            interval,
            phase: self.phase,
            beats_skipped: (multiple - 1) as u32,
        })
    }

    /// Forget everything, including the baseline.
    pub fn reset(&mut self) {
        self.clear_window();
        self.baseline = None;
    }

    fn clear_window(&mut self) {
        self.window.clear();
        self.phase = 0;
    }

    fn push(&mut self, interval: f64) {
        while self.window.len() >= self.config.window_capacity {
            self.window.pop_front();
        }
        self.window.push_back(interval);
    }
}

/// Render a phase as a letter: 0 is `a`, 1 is `b`, and so on.
pub fn phase_letter(phase: u32) -> char {
    char::from_u32('a' as u32 + phase % 26).unwrap_or('?')
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn estimator() -> IntervalEstimator {
        IntervalEstimator::new(EstimatorConfig::from_settings(&TrackerSettings {
            min_bpm: 55.0,
            max_bpm: 155.0,
            window_capacity: 5,
            ..Default::default()
        }))
    }

    fn beat(observation: Observation) -> CorrectedInterval {
        match observation {
            Observation::Beat(beat) => beat,
            other => panic!("expected a beat, got {:?}", other),
        }
    }

    #[test]
    fn test_first_sample_only_seeds() {
        let mut est = estimator();
        assert_eq!(est.observe(1.0), Observation::Ignore);
        assert_eq!(est.window_len(), 1);
        assert_eq!(est.phase(), 0);
    }

    #[test]
    fn test_steady_tempo() {
        let mut est = estimator();
        est.observe(1.0);

        let phases: Vec<u32> = (0..6)
            .map(|_| {
                let b = beat(est.observe(1.0));
                assert_relative_eq!(b.interval, 1.0);
                assert_eq!(b.beats_skipped, 0);
                b.phase
            })
            .collect();
        assert_eq!(phases, vec![1, 2, 3, 0, 1, 2]);
    }

    #[test]
    fn test_missed_beat_is_recovered() {
        let mut est = estimator();
        est.observe(1.0);
        let first = beat(est.observe(1.0));
        assert_eq!(first.phase, 1);

        let b = beat(est.observe(2.0));
        assert_relative_eq!(b.interval, 1.0);
        assert_eq!(b.beats_skipped, 1);
        assert_eq!(b.phase, 3);
    }

    #[test]
    fn test_silence_gap_resets() {
        let mut est = estimator();
        est.observe(1.0);
        est.observe(1.0);
        assert_eq!(est.phase(), 1);

        // 5s exceeds 3 * 60/55 s
        assert_eq!(est.observe(5.0), Observation::Reset);
        assert_eq!(est.window_len(), 0);
        assert_eq!(est.phase(), 0);
    }

    #[test]
    fn test_noise_leaves_state_untouched() {
        let mut est = estimator();
        est.observe(0.5);
        est.observe(0.5);
        est.observe(0.5);
        let window: Vec<f64> = est.window().collect();
        let phase = est.phase();

        // Shorter than 60/155 s
        assert_eq!(est.observe(0.2), Observation::Ignore);
        assert_eq!(est.observe(0.2), Observation::Ignore);
        assert_eq!(est.window().collect::<Vec<_>>(), window);
        assert_eq!(est.phase(), phase);
    }

    #[test]
    fn test_non_finite_interval_ignored() {
        let mut est = estimator();
        est.observe(1.0);
        assert_eq!(est.observe(f64::NAN), Observation::Ignore);
        assert_eq!(est.observe(-0.4), Observation::Ignore);
        assert_eq!(est.observe(0.0), Observation::Ignore);
        assert_eq!(est.window_len(), 1);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut est = estimator();
        for _ in 0..20 {
            est.observe(0.6);
        }
        assert_eq!(est.window_len(), 5);
        assert!(est.window().all(|i| i > 0.0));
    }

    #[test]
    fn test_degenerate_config_is_clamped() {
        let mut est = IntervalEstimator::new(EstimatorConfig {
            window_capacity: 0,
            phase_modulus: 0,
            ..Default::default()
        });
        assert_eq!(est.config().window_capacity, 1);
        assert_eq!(est.config().phase_modulus, 1);

        for _ in 0..10 {
            est.observe(0.6);
        }
        assert_eq!(est.window_len(), 1);
        assert_eq!(est.phase(), 0);
        assert_relative_eq!(beat(est.observe(1.2)).interval, 0.6);
    }

    #[test]
    fn test_short_interval_never_yields_zero_multiple() {
        let mut est = estimator();
        est.observe(1.0);
        // Rounds to zero multiples, clamped to one.
        let b = beat(est.observe(0.45));
        assert_relative_eq!(b.interval, 0.45);
        assert_eq!(b.beats_skipped, 0);
    }

    #[test]
    fn test_corrected_interval_lower_bound() {
        let mut est = estimator();
        let raws = [0.5, 0.52, 0.49, 0.51, 0.5, 1.0, 0.99, 0.74, 0.5, 1.02, 0.98];
        for raw in raws {
            if let Observation::Beat(b) = est.observe(raw) {
                assert!(b.interval > 0.0);
                assert!(b.interval >= raw / (est.window_len() as f64 + 1.0));
            }
        }
    }

    #[test]
    fn test_observe_beat_tracks_baseline() {
        let mut est = estimator();
        assert_eq!(est.observe_beat(10.0), Observation::Reset);
        assert_eq!(est.observe_beat(11.0), Observation::Ignore);
        let b = beat(est.observe_beat(12.0));
        assert_relative_eq!(b.interval, 1.0);

        // Noise still moves the baseline.
        assert_eq!(est.observe_beat(12.1), Observation::Ignore);
        assert_eq!(est.baseline(), Some(12.1));

        // Long silence resets and restarts from the new beat.
        assert_eq!(est.observe_beat(30.0), Observation::Reset);
        assert_eq!(est.baseline(), Some(30.0));
        assert_eq!(est.observe_beat(31.0), Observation::Ignore);
    }

    #[test]
    fn test_independent_sessions() {
        let mut a = estimator();
        let mut b = estimator();
        a.observe(1.0);
        a.observe(1.0);
        a.observe(1.0);
        assert_eq!(a.phase(), 2);
        assert_eq!(b.phase(), 0);
        assert_eq!(b.observe(0.5), Observation::Ignore);
        assert_eq!(a.window_len(), 3);
    }

    #[test]
    fn test_phase_letter() {
        assert_eq!(phase_letter(0), 'a');
        assert_eq!(phase_letter(3), 'd');
    }
}
