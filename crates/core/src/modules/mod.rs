pub mod metronome_module;
pub mod module_manager;
pub mod sync_output_module;
pub mod traits;

// Re-export for convenience
pub use metronome_module::{MetronomeModule, ScheduleHandle};
pub use module_manager::ModuleManager;
pub use sync_output_module::{SyncOutputModule, SyncPayload};
pub use traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage, ModuleResult};
