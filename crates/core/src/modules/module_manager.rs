use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};

const CHANNEL_CAPACITY: usize = 1000;

/// How long `shutdown` waits for each module before aborting its task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type StatusMap = HashMap<ModuleId, HashMap<String, String>>;

pub struct ModuleManager {
    modules: HashMap<ModuleId, Box<dyn AsyncModule>>,
    module_handles: HashMap<ModuleId, JoinHandle<()>>,
    module_senders: HashMap<ModuleId, mpsc::Sender<ModuleEvent>>,
    message_receiver: Option<mpsc::Receiver<ModuleMessage>>,
    message_sender: mpsc::Sender<ModuleMessage>,
    statuses: Arc<RwLock<StatusMap>>,
    running: bool,
}

impl ModuleManager {
    pub fn new() -> Self {
        let (message_sender, message_receiver) = mpsc::channel(CHANNEL_CAPACITY);

        Self {
            modules: HashMap::new(),
            module_handles: HashMap::new(),
            module_senders: HashMap::new(),
            message_receiver: Some(message_receiver),
            message_sender,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            running: false,
        }
    }

    /// Register a new module with the manager, replacing any with the same id
    pub fn register_module(&mut self, module: Box<dyn AsyncModule>) {
        let id = module.id();
        if self.modules.insert(id, module).is_some() {
            log::warn!("Module {:?} registered twice, keeping the latest", id);
        }
    }

    /// Initialize all registered modules
    pub async fn initialize(&mut self) -> ModuleResult {
        for (id, module) in &mut self.modules {
            match module.initialize().await {
                Ok(_) => log::info!("Module {:?} initialized successfully", id),
                Err(e) => {
                    log::error!("Failed to initialize module {:?}: {}", id, e);
                    return Err(format!("{:?} module error: {}", id, e).into());
                }
            }
            self.statuses.write().insert(*id, module.status());
        }
        Ok(())
    }

    /// Start each module in its own task
    pub async fn start(&mut self) -> ModuleResult {
        if self.running {
            return Err("Module manager is already running".into());
        }

        for (id, mut module) in std::mem::take(&mut self.modules) {
            let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let message_tx = self.message_sender.clone();
            let statuses = Arc::clone(&self.statuses);

            let handle = tokio::spawn(async move {
                if let Err(e) = module.run(event_rx, message_tx.clone()).await {
                    log::error!("Module {:?} failed: {}", id, e);
                    let _ = message_tx
                        .send(ModuleMessage::Error(format!("Module {:?} error: {}", id, e)))
                        .await;
                }
                if let Err(e) = module.shutdown().await {
                    log::error!("Module {:?} shutdown error: {}", id, e);
                }
                statuses.write().insert(id, module.status());
                log::info!("Module {:?} stopped", id);
            });

            self.module_handles.insert(id, handle);
            self.module_senders.insert(id, event_tx);
        }

        self.running = true;
        Ok(())
    }

    /// Send an event to a specific module
    pub async fn send_to_module(
        &self,
        module_id: ModuleId,
        event: ModuleEvent,
    ) -> Result<(), String> {
        let sender = self
            .module_senders
            .get(&module_id)
            .ok_or_else(|| format!("Module {:?} not found", module_id))?;
        sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event to module {:?}: {}", module_id, e))
    }

    /// Broadcast an event to all modules
    pub async fn broadcast_event(&self, event: ModuleEvent) {
        for (id, sender) in &self.module_senders {
            if let Err(e) = sender.send(event.clone()).await {
                log::debug!("Failed to broadcast event to module {:?}: {}", id, e);
            }
        }
    }

    /// Get the message receiver (should only be called once)
    pub fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<ModuleMessage>> {
        self.message_receiver.take()
    }

    /// Whether a started module's task is still alive
    pub fn is_module_running(&self, module_id: ModuleId) -> bool {
        self.module_handles
            .get(&module_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Shutdown all modules gracefully
    pub async fn shutdown(&mut self) -> ModuleResult {
        if !self.running {
            return Ok(());
        }

        log::info!("Shutting down module manager...");
        self.broadcast_event(ModuleEvent::Shutdown).await;

        for (id, mut handle) in std::mem::take(&mut self.module_handles) {
            log::debug!("Waiting for module {:?} to shutdown...", id);
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Module {:?} task error: {}", id, e),
                Err(_) => {
                    log::warn!("Module {:?} did not stop within {:?}, aborting", id, SHUTDOWN_TIMEOUT);
                    handle.abort();
                }
            }
        }

        self.module_senders.clear();
        self.running = false;
        log::info!("Module manager shutdown complete");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Status reported by each module after initialization or after it stopped
    pub fn get_status(&self) -> StatusMap {
        self.statuses.read().clone()
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}
