//! Interface to the external beat detection engine.

use std::ops::ControlFlow;

use pulse_core::EngineError;

/// One analysis frame reported by an engine.
#[derive(Debug, Clone, Copy)]
pub struct BeatFrame<'a> {
    /// Beat timestamps detected in this frame, in monotonic seconds. Often empty.
    pub beats: &'a [f64],
    /// Index of the analysis frame, counted from the start of the run.
    pub frame_index: u64,
}

/// Callback registered with an engine; `Break` asks the engine to stop.
pub type BeatCallback<'a> = dyn FnMut(BeatFrame<'_>) -> ControlFlow<()> + 'a;

/// A blocking, long-running beat detector.
///
/// `run` owns the calling thread until the stream ends, the callback returns
/// `Break`, or the engine fails.
pub trait BeatEngine: Send {
    fn name(&self) -> &str;

    fn run(&mut self, on_beats: &mut BeatCallback<'_>) -> Result<(), EngineError>;
}

/// Replays a fixed list of frames. Intended for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    frames: Vec<Vec<f64>>,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
}

impl ScriptedEngine {
    pub fn new(frames: Vec<Vec<f64>>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// One beat per frame.
    pub fn from_beats(beats: &[f64]) -> Self {
        Self::new(beats.iter().map(|&b| vec![b]).collect())
    }

    /// Fail with an engine error instead of delivering frame `index`.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Panic instead of delivering frame `index`.
    pub fn panic_at(mut self, index: usize) -> Self {
        self.panic_at = Some(index);
        self
    }
}

impl BeatEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(&mut self, on_beats: &mut BeatCallback<'_>) -> Result<(), EngineError> {
        for (index, beats) in self.frames.iter().enumerate() {
            if self.fail_at == Some(index) {
                return Err(EngineError::Failed(format!("scripted failure at frame {}", index)));
            }
            if self.panic_at == Some(index) {
                panic!("scripted panic at frame {}", index);
            }
            let frame = BeatFrame {
                beats,
                frame_index: index as u64,
            };
            if on_beats(frame).is_break() {
                break;
            }
        }
        Ok(())
    }
}
