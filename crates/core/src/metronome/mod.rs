pub mod scheduler;

pub use scheduler::{MetronomeScheduler, ScheduleState, SchedulerState, TempoSource, Tick};
