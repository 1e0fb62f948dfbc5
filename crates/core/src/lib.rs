//! Beat interval tracking and phase-locked metronome scheduling.
//!
//! Raw beat detections flow through [`IntervalEstimator`] and
//! [`BeatPredictor`] on the detector's own thread, cross into the async
//! runtime over the event bridge, and drive the [`MetronomeScheduler`].

pub use bridge::{event_bridge, unbounded_event_bridge, BridgeClosed, BridgeMessage, BridgeReceiver, BridgeSender};
pub use clock::{monotonic_seconds, Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, TrackerSettings};
pub use error::{validate_bpm, EngineError, TempoError};
pub use metronome::{MetronomeScheduler, ScheduleState, SchedulerState, TempoSource, Tick};
// Async module system exports
pub use modules::{
    AsyncModule, MetronomeModule, ModuleEvent, ModuleId, ModuleManager, ModuleMessage,
    ModuleResult, ScheduleHandle, SyncOutputModule, SyncPayload,
};
pub use rhythm::{
    phase_letter, BeatPredictor, CorrectedInterval, EstimatorConfig, IntervalEstimator,
    Observation, Prediction, DRIFT_DAMPING,
};

pub mod bridge;
mod clock;
mod config;
mod error;
pub mod metronome;
pub mod modules;
pub mod rhythm;
