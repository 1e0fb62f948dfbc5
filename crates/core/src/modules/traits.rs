use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::metronome::Tick;
use crate::rhythm::Prediction;

/// Unique identifier for each module type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    /// Beat source adapter and bridge consumer.
    Tracker,
    /// Phase-locked tick scheduler.
    Metronome,
    /// Downstream sync consumer.
    SyncOutput,
}

/// Events that can be sent between modules
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleEvent {
    /// Fresh tempo estimate from beat detection
    Prediction(Prediction),
    /// Manual BPM override
    SetBpm(f64),
    /// Change the tick skew, in milliseconds
    SetSkew(f64),
    /// Restart a stopped metronome at the given BPM
    StartMetronome(f64),
    /// Stop ticking without shutting the module down
    StopMetronome,
    /// Metronome tick
    Tick(Tick),
    /// System events
    Shutdown,
}

/// Messages passed between modules and the module manager
#[derive(Debug)]
pub enum ModuleMessage {
    Event(ModuleEvent),
    Status(String),
    Error(String),
}

pub type ModuleResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Trait that all async modules must implement
#[async_trait]
pub trait AsyncModule: Send + Sync {
    /// Get the unique identifier for this module
    fn id(&self) -> ModuleId;

    /// Initialize the module (called once at startup)
    async fn initialize(&mut self) -> ModuleResult;

    /// Run until `Shutdown` arrives, the event channel closes, or the module fails
    async fn run(
        &mut self,
        rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult;

    /// Release resources after `run` returns
    async fn shutdown(&mut self) -> ModuleResult;

    /// Get the module's status
    fn status(&self) -> HashMap<String, String>;
}
