use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{
    unbounded_event_bridge, AsyncModule, BridgeMessage, Clock, ModuleEvent, ModuleId,
    ModuleMessage, ModuleResult, SystemClock, TempoError, TrackerSettings,
};
use tokio::sync::mpsc;

use crate::engine::BeatEngine;
use crate::source::{BeatSource, BeatSourceHandle};

/// How long to keep draining the bridge after a shutdown request before
/// leaving a blocked engine thread behind.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Runs a beat engine and forwards its tempo predictions as module events.
pub struct TrackerModule {
    settings: TrackerSettings,
    clock: Arc<dyn Clock>,
    engine: Mutex<Option<Box<dyn BeatEngine>>>,
    engine_name: String,
    source: Option<BeatSourceHandle>,
    predictions: u64,
    status: HashMap<String, String>,
}

impl TrackerModule {
    pub fn new(settings: &TrackerSettings, engine: Box<dyn BeatEngine>) -> Self {
        Self::with_clock(settings, engine, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: &TrackerSettings,
        engine: Box<dyn BeatEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings: settings.clone(),
            clock,
            engine_name: engine.name().to_string(),
            engine: Mutex::new(Some(engine)),
            source: None,
            predictions: 0,
            status: HashMap::new(),
        }
    }
}

#[async_trait]
impl AsyncModule for TrackerModule {
    fn id(&self) -> ModuleId {
        ModuleId::Tracker
    }

    async fn initialize(&mut self) -> ModuleResult {
        self.settings.validate()?;
        log::info!(
            "Initializing tracker: {} engine, {:.0}-{:.0} BPM",
            self.engine_name,
            self.settings.min_bpm,
            self.settings.max_bpm
        );
        self.status
            .insert("engine".to_string(), self.engine_name.clone());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult {
        let engine = self
            .engine
            .lock()
            .take()
            .ok_or("beat engine has already been run")?;

        let (sender, mut bridge) = unbounded_event_bridge();
        let source = BeatSource::new(&self.settings, Arc::clone(&self.clock));
        let handle = source.spawn(engine, sender)?;
        self.status
            .insert("status".to_string(), "running".to_string());
        let _ = tx
            .send(ModuleMessage::Status("Tracker module running".to_string()))
            .await;

        let timeout = self.settings.receive_timeout();
        let mut stop_requested: Option<Instant> = None;

        let outcome: Result<(), TempoError> = loop {
            tokio::select! {
                event = rx.recv(), if stop_requested.is_none() => {
                    match event {
                        Some(ModuleEvent::Shutdown) | None => {
                            log::info!("Tracker module received shutdown signal");
                            handle.stop();
                            stop_requested = Some(Instant::now());
                        }
                        Some(_) => {}
                    }
                }
                msg = bridge.receive_timeout(timeout) => {
                    match msg {
                        Ok(Some(BridgeMessage::Prediction(prediction))) => {
                            self.predictions += 1;
                            if tx
                                .send(ModuleMessage::Event(ModuleEvent::Prediction(prediction)))
                                .await
                                .is_err()
                            {
                                log::warn!("Prediction receiver gone, stopping tracker");
                                handle.stop();
                                stop_requested.get_or_insert_with(Instant::now);
                            }
                        }
                        Ok(Some(BridgeMessage::Terminate)) => break Ok(()),
                        Ok(Some(BridgeMessage::Failure(e))) => break Err(e.into()),
                        Ok(None) => {
                            if stop_requested.is_some_and(|at| at.elapsed() >= STOP_GRACE) {
                                log::warn!("Beat engine did not stop within {:?}", STOP_GRACE);
                                break Ok(());
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        if bridge.is_finished() {
            self.source = Some(handle);
        } else {
            log::warn!("Leaving blocked beat source thread behind");
        }
        self.status
            .insert("predictions".to_string(), self.predictions.to_string());

        match outcome {
            Ok(()) => {
                log::info!("Tracker module finished after {} predictions", self.predictions);
                Ok(())
            }
            Err(e) => {
                self.status
                    .insert("error".to_string(), e.to_string());
                Err(Box::new(e))
            }
        }
    }

    async fn shutdown(&mut self) -> ModuleResult {
        if let Some(handle) = self.source.take() {
            // The producer has already sent its terminal message.
            tokio::task::spawn_blocking(move || handle.join()).await?;
        }
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}
