use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerSettings;
use crate::metronome::{MetronomeScheduler, ScheduleState, SchedulerState};

/// Shared, read-only view of the metronome's schedule.
pub type ScheduleHandle = Arc<RwLock<Option<ScheduleState>>>;

/// Drives a [`MetronomeScheduler`] in real time and emits `Tick` events.
pub struct MetronomeModule {
    scheduler: MetronomeScheduler,
    clock: Arc<dyn Clock>,
    snapshot: ScheduleHandle,
    /// Longest single sleep, so deadline changes are picked up promptly.
    max_wait: Duration,
    initial_bpm: Option<f64>,
    ticks: u64,
    status: HashMap<String, String>,
}

impl MetronomeModule {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &TrackerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler: MetronomeScheduler::from_settings(settings),
            clock,
            snapshot: Arc::new(RwLock::new(None)),
            max_wait: settings.receive_timeout(),
            initial_bpm: None,
            ticks: 0,
            status: HashMap::new(),
        }
    }

    /// Start free-running at `bpm` before any prediction arrives.
    pub fn with_initial_bpm(mut self, bpm: f64) -> Self {
        self.initial_bpm = Some(bpm);
        self
    }

    /// Handle for consumers that read the schedule instead of subscribing.
    pub fn schedule_handle(&self) -> ScheduleHandle {
        Arc::clone(&self.snapshot)
    }

    fn time_until_next_tick(&self) -> Duration {
        match self.scheduler.next_deadline() {
            Some(deadline) => {
                // Clamp before converting; a far deadline does not fit a Duration.
                let remaining = (deadline - self.clock.now_epoch())
                    .clamp(0.0, self.max_wait.as_secs_f64());
                Duration::try_from_secs_f64(remaining).unwrap_or(self.max_wait)
            }
            None => self.max_wait,
        }
    }

    /// Apply one incoming event. Returns false when the module should stop.
    fn handle_event(&mut self, event: ModuleEvent) -> bool {
        let now = self.clock.now_epoch();
        let result = match event {
            ModuleEvent::Prediction(prediction) => self.scheduler.apply_prediction(&prediction),
            ModuleEvent::SetBpm(bpm) => {
                log::info!("Manual tempo override: {:.2} BPM", bpm);
                self.scheduler.override_bpm(bpm, now)
            }
            ModuleEvent::SetSkew(skew_ms) => self.scheduler.set_skew(skew_ms / 1000.0),
            ModuleEvent::StartMetronome(bpm) => self.scheduler.restart(bpm, now),
            ModuleEvent::StopMetronome => {
                self.scheduler.stop();
                Ok(())
            }
            ModuleEvent::Shutdown => {
                log::info!("Metronome module received shutdown signal");
                return false;
            }
            ModuleEvent::Tick(_) => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("Metronome rejected event: {}", e);
        }
        true
    }

    fn publish_snapshot(&mut self) {
        let schedule = self.scheduler.schedule();
        *self.snapshot.write() = schedule;

        let state = match self.scheduler.state() {
            SchedulerState::Idle => "idle",
            SchedulerState::Waiting | SchedulerState::Ticking => "running",
            SchedulerState::Stopped => "stopped",
        };
        self.status.insert("state".to_string(), state.to_string());
        if let Some(schedule) = schedule {
            self.status
                .insert("bpm".to_string(), format!("{:.2}", schedule.bpm));
            self.status
                .insert("step".to_string(), schedule.step_index.to_string());
            self.status.insert(
                "tempo_source".to_string(),
                schedule.tempo_source.display_name().to_string(),
            );
        }
        self.status
            .insert("ticks".to_string(), self.ticks.to_string());
    }
}

#[async_trait]
impl AsyncModule for MetronomeModule {
    fn id(&self) -> ModuleId {
        ModuleId::Metronome
    }

    async fn initialize(&mut self) -> ModuleResult {
        log::info!(
            "Initializing metronome: {} steps, skew {:.1}ms",
            self.scheduler.max_steps(),
            self.scheduler.skew_seconds() * 1000.0
        );
        if let Some(bpm) = self.initial_bpm {
            self.scheduler.override_bpm(bpm, self.clock.now_epoch())?;
        }
        self.publish_snapshot();
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult {
        log::info!("Metronome module running");
        let _ = tx
            .send(ModuleMessage::Status("Metronome module running".to_string()))
            .await;

        loop {
            let wait = self.time_until_next_tick();

            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle_event(event) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if let Some(tick) = self.scheduler.poll(self.clock.now_epoch()) {
                self.ticks += 1;
                log::debug!("Tick {} at {:.3} ({:.2} BPM)", tick.step_index, tick.epoch, tick.bpm);
                if tx
                    .send(ModuleMessage::Event(ModuleEvent::Tick(tick)))
                    .await
                    .is_err()
                {
                    log::warn!("Tick receiver gone, stopping metronome");
                    break;
                }
            }
            self.publish_snapshot();
        }

        log::info!("Metronome module shutting down");
        Ok(())
    }

    async fn shutdown(&mut self) -> ModuleResult {
        self.scheduler.stop();
        self.publish_snapshot();
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::clock::ManualClock;
    use crate::metronome::Tick;
    use crate::rhythm::Prediction;

    async fn next_tick(messages: &mut mpsc::Receiver<ModuleMessage>) -> Tick {
        loop {
            match messages.recv().await {
                Some(ModuleMessage::Event(ModuleEvent::Tick(tick))) => return tick,
                Some(_) => continue,
                None => panic!("metronome stopped"),
            }
        }
    }

    #[test]
    fn test_events_update_scheduler() {
        let clock = ManualClock::new(1000.0);
        let mut module = MetronomeModule::with_clock(&TrackerSettings::default(), Arc::new(clock.clone()));
        let handle = module.schedule_handle();

        assert!(module.handle_event(ModuleEvent::Prediction(Prediction {
            bpm: 120.0,
            next_beat_epoch: 1000.4,
            delta: 0.0,
        })));
        module.publish_snapshot();
        assert_eq!(handle.read().unwrap().next_tick_epoch, 1000.4);

        clock.advance(0.1);
        module.handle_event(ModuleEvent::SetBpm(60.0));
        module.publish_snapshot();
        assert_relative_eq!(handle.read().unwrap().next_tick_epoch, 1001.1);

        // Rejected tempo leaves the schedule alone.
        module.handle_event(ModuleEvent::SetBpm(0.0));
        assert_eq!(module.scheduler.schedule().unwrap().bpm, 60.0);

        module.handle_event(ModuleEvent::StopMetronome);
        module.publish_snapshot();
        assert_eq!(module.status()["state"], "stopped");
        assert!(!module.handle_event(ModuleEvent::Shutdown));
    }

    #[test]
    fn test_wait_is_capped() {
        let clock = ManualClock::new(0.0);
        let settings = TrackerSettings { receive_timeout_ms: 100, ..Default::default() };
        let mut module = MetronomeModule::with_clock(&settings, Arc::new(clock.clone()));
        assert_eq!(module.time_until_next_tick(), Duration::from_millis(100));

        module.handle_event(ModuleEvent::SetBpm(1200.0));
        assert_eq!(module.time_until_next_tick(), Duration::from_millis(50));

        clock.advance(1.0);
        assert_eq!(module.time_until_next_tick(), Duration::ZERO);
    }

    #[test]
    fn test_far_deadline_waits_at_most_max_wait() {
        let clock = ManualClock::new(1000.0);
        let settings = TrackerSettings { receive_timeout_ms: 100, ..Default::default() };
        let mut module = MetronomeModule::with_clock(&settings, Arc::new(clock.clone()));

        module.handle_event(ModuleEvent::SetBpm(1e-20));
        assert_eq!(module.time_until_next_tick(), Duration::from_millis(100));

        module.handle_event(ModuleEvent::Prediction(Prediction {
            bpm: 120.0,
            next_beat_epoch: f64::MAX,
            delta: 0.0,
        }));
        assert_eq!(module.time_until_next_tick(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_override_takes_effect_mid_wait() {
        let mut module = MetronomeModule::new(&TrackerSettings::default());
        let (event_tx, event_rx) = mpsc::channel(16);
        let (message_tx, mut messages) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            module.initialize().await.unwrap();
            module.run(event_rx, message_tx).await.unwrap();
        });

        event_tx.send(ModuleEvent::SetBpm(60.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let override_at = SystemClock.now_epoch();
        event_tx.send(ModuleEvent::SetBpm(120.0)).await.unwrap();

        let tick = next_tick(&mut messages).await;
        assert_eq!(tick.bpm, 120.0);
        assert_eq!(tick.step_index, 0);
        let elapsed = tick.epoch - override_at;
        assert!(
            (0.45..0.65).contains(&elapsed),
            "tick fired {:.3}s after override",
            elapsed
        );

        event_tx.send(ModuleEvent::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_bpm_free_runs() {
        let settings = TrackerSettings { max_steps: 4, ..Default::default() };
        let mut module = MetronomeModule::new(&settings).with_initial_bpm(600.0);
        let handle = module.schedule_handle();
        let (event_tx, event_rx) = mpsc::channel(16);
        let (message_tx, mut messages) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            module.initialize().await.unwrap();
            module.run(event_rx, message_tx).await.unwrap();
        });

        let mut steps = Vec::new();
        for _ in 0..5 {
            steps.push(next_tick(&mut messages).await.step_index);
        }
        assert_eq!(steps, vec![0, 1, 2, 3, 0]);
        assert_eq!(handle.read().unwrap().bpm, 600.0);

        drop(event_tx);
        task.await.unwrap();
    }
}
