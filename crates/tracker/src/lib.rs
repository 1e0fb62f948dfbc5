//! Beat source adapter for the pulse tempo engine.
//!
//! A [`BeatEngine`] runs on its own thread; [`BeatSource`] turns its raw
//! detections into tempo predictions and hands them to async consumers over
//! the event bridge. [`TrackerModule`] plugs the whole thing into the module
//! system.

pub mod engine;
pub mod engines;
pub mod module;
pub mod source;

pub use engine::{BeatCallback, BeatEngine, BeatFrame, ScriptedEngine};
pub use engines::{ClickTrackConfig, ClickTrackEngine, TapEngine};
pub use module::TrackerModule;
pub use source::{BeatSource, BeatSourceHandle, BeatTracker, SourceError, StopSignal};
