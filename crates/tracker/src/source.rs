//! Runs a beat engine on a dedicated thread and feeds its detections
//! through the estimator and predictor into the event bridge.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use pulse_core::{
    phase_letter, BeatPredictor, BridgeSender, Clock, EngineError, EstimatorConfig,
    IntervalEstimator, Observation, Prediction, TrackerSettings,
};
use thiserror::Error;

use crate::engine::{BeatEngine, BeatFrame};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn beat source thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Cancellation flag shared between the async side and the producer thread.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Estimator and predictor state for one tracking session.
///
/// Lives on the producer thread only; just the resulting predictions cross
/// into the async side.
pub struct BeatTracker {
    estimator: IntervalEstimator,
    predictor: BeatPredictor,
    clock: Arc<dyn Clock>,
}

impl BeatTracker {
    pub fn new(settings: &TrackerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            estimator: IntervalEstimator::new(EstimatorConfig::from_settings(settings)),
            predictor: BeatPredictor::new(),
            clock,
        }
    }

    /// Observe one raw beat; returns a prediction for accepted beats.
    pub fn on_beat(&mut self, timestamp: f64) -> Option<Prediction> {
        match self.estimator.observe_beat(timestamp) {
            Observation::Beat(beat) => {
                let prediction = match self.predictor.on_interval(beat.interval, self.clock.now_epoch()) {
                    Ok(prediction) => prediction,
                    Err(e) => {
                        log::warn!("Dropping beat at {:.3}: {}", timestamp, e);
                        return None;
                    }
                };
                log::debug!(
                    "T{}{:.0} ({:.0}){}",
                    phase_letter(beat.phase),
                    beat.interval * 1000.0,
                    prediction.bpm,
                    if beat.beats_skipped > 0 {
                        format!(" skipped {}", beat.beats_skipped)
                    } else {
                        String::new()
                    }
                );
                Some(prediction)
            }
            Observation::Reset => {
                log::debug!("Beat stream reset at {:.3}", timestamp);
                self.predictor.reset();
                None
            }
            Observation::Ignore => {
                log::trace!("Ignoring beat at {:.3}", timestamp);
                None
            }
        }
    }

    pub fn estimator(&self) -> &IntervalEstimator {
        &self.estimator
    }
}

/// Adapter owning one run of a beat engine.
pub struct BeatSource {
    settings: TrackerSettings,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
}

impl BeatSource {
    pub fn new(settings: &TrackerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings: settings.clone(),
            clock,
            stop: StopSignal::new(),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run the engine on the calling thread until it finishes, fails, or is
    /// stopped. Always ends the bridge with exactly one terminal message.
    pub fn run(self, mut engine: Box<dyn BeatEngine>, mut sender: BridgeSender) {
        let mut tracker = BeatTracker::new(&self.settings, Arc::clone(&self.clock));
        let stop = self.stop;
        log::info!("Beat source started with {} engine", engine.name());

        let outcome = {
            let mut on_beats = |frame: BeatFrame<'_>| -> ControlFlow<()> {
                if stop.is_triggered() {
                    return ControlFlow::Break(());
                }
                for &timestamp in frame.beats {
                    if stop.is_triggered() {
                        return ControlFlow::Break(());
                    }
                    if let Some(prediction) = tracker.on_beat(timestamp) {
                        if let Err(e) = sender.send_prediction(prediction) {
                            log::warn!("Stopping beat source: {}", e);
                            stop.trigger();
                            return ControlFlow::Break(());
                        }
                    }
                }
                ControlFlow::Continue(())
            };

            match panic::catch_unwind(AssertUnwindSafe(|| engine.run(&mut on_beats))) {
                Ok(result) => result,
                Err(payload) => Err(EngineError::Panicked(panic_message(payload.as_ref()))),
            }
        };

        match &outcome {
            Ok(()) if stop.is_triggered() => log::info!("Beat source cancelled"),
            Ok(()) => log::info!("Beat source finished"),
            Err(e) => log::error!("Beat source failed: {}", e),
        }
        sender.finish(outcome);
    }

    /// Run the engine on a new thread named `beat-source`.
    pub fn spawn(
        self,
        engine: Box<dyn BeatEngine>,
        sender: BridgeSender,
    ) -> Result<BeatSourceHandle, SourceError> {
        let stop = self.stop_signal();
        let thread = thread::Builder::new()
            .name("beat-source".to_string())
            .spawn(move || self.run(engine, sender))?;
        Ok(BeatSourceHandle { stop, thread })
    }
}

/// Handle to a running beat source thread.
pub struct BeatSourceHandle {
    stop: StopSignal,
    thread: JoinHandle<()>,
}

impl BeatSourceHandle {
    /// Ask the producer to stop at its next callback.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the producer thread exits.
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("Beat source thread panicked outside the engine");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
