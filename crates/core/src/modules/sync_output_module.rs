use std::collections::HashMap;
use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};

/// Minimal payload handed to downstream sync receivers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncPayload {
    Tempo { bpm: f64, next_beat_epoch: f64 },
    Tick { step_index: usize, epoch: f64 },
}

impl SyncPayload {
    pub fn from_event(event: &ModuleEvent) -> Option<Self> {
        match event {
            ModuleEvent::Prediction(p) => Some(Self::Tempo {
                bpm: p.bpm,
                next_beat_epoch: p.next_beat_epoch,
            }),
            ModuleEvent::Tick(t) => Some(Self::Tick {
                step_index: t.step_index,
                epoch: t.epoch,
            }),
            _ => None,
        }
    }
}

/// Writes one JSON line per tempo prediction or tick.
pub struct SyncOutputModule {
    writer: Mutex<Box<dyn Write + Send>>,
    lines: u64,
    status: HashMap<String, String>,
}

impl SyncOutputModule {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            lines: 0,
            status: HashMap::new(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write_payload(&mut self, payload: &SyncPayload) -> std::io::Result<()> {
        let line = serde_json::to_string(payload)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        self.lines += 1;
        Ok(())
    }
}

#[async_trait]
impl AsyncModule for SyncOutputModule {
    fn id(&self) -> ModuleId {
        ModuleId::SyncOutput
    }

    async fn initialize(&mut self) -> ModuleResult {
        self.status
            .insert("status".to_string(), "initialized".to_string());
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        _tx: mpsc::Sender<ModuleMessage>,
    ) -> ModuleResult {
        log::info!("Sync output module running");

        while let Some(event) = rx.recv().await {
            if event == ModuleEvent::Shutdown {
                break;
            }
            if let Some(payload) = SyncPayload::from_event(&event) {
                self.write_payload(&payload)?;
            }
        }

        self.status
            .insert("lines".to_string(), self.lines.to_string());
        Ok(())
    }

    async fn shutdown(&mut self) -> ModuleResult {
        self.writer.lock().flush()?;
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}
