use std::io::{BufRead, BufReader};

use pulse_core::{monotonic_seconds, EngineError};

use crate::engine::{BeatCallback, BeatEngine, BeatFrame};

/// Tap tempo from a line-oriented reader, usually stdin.
///
/// Every line is one beat. A line holding a number is taken as the beat
/// timestamp in seconds, which allows replaying recorded detections; any
/// other line is stamped with the time it arrived. `q` or end of input ends
/// the stream.
pub struct TapEngine {
    reader: Box<dyn BufRead + Send>,
}

impl TapEngine {
    pub fn new(reader: Box<dyn BufRead + Send>) -> Self {
        Self { reader }
    }

    pub fn stdin() -> Self {
        Self::new(Box::new(BufReader::new(std::io::stdin())))
    }
}

impl BeatEngine for TapEngine {
    fn name(&self) -> &str {
        "tap"
    }

    fn run(&mut self, on_beats: &mut BeatCallback<'_>) -> Result<(), EngineError> {
        log::info!("Tap a key and press enter on each beat, 'q' to finish");

        let mut line = String::new();
        let mut frame_index = 0;
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| EngineError::Failed(format!("failed to read taps: {}", e)))?;
            if read == 0 {
                log::debug!("Tap input closed");
                return Ok(());
            }

            let input = line.trim();
            if input.eq_ignore_ascii_case("q") {
                return Ok(());
            }
            let timestamp = input.parse::<f64>().unwrap_or_else(|_| monotonic_seconds());

            let frame = BeatFrame {
                beats: &[timestamp],
                frame_index,
            };
            frame_index += 1;
            if on_beats(frame).is_break() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::ops::ControlFlow;

    use super::*;

    fn run_taps(input: &str) -> (Vec<f64>, Result<(), EngineError>) {
        let mut engine = TapEngine::new(Box::new(Cursor::new(input.to_string())));
        let mut beats = Vec::new();
        let result = engine.run(&mut |frame: BeatFrame<'_>| {
            beats.extend_from_slice(frame.beats);
            ControlFlow::Continue(())
        });
        (beats, result)
    }

    #[test]
    fn test_recorded_timestamps() {
        let (beats, result) = run_taps("1.0\n1.5\n2.0\n");
        assert!(result.is_ok());
        assert_eq!(beats, vec![1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_quit_ends_stream() {
        let (beats, result) = run_taps("3.0\nq\n4.0\n");
        assert!(result.is_ok());
        assert_eq!(beats, vec![3.0]);
    }

    #[test]
    fn test_plain_taps_use_arrival_time() {
        let (beats, _) = run_taps("\nx\n");
        assert_eq!(beats.len(), 2);
        assert!(beats[1] >= beats[0]);
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("device unplugged"))
        }
    }

    #[test]
    fn test_read_error_is_failure() {
        let mut engine = TapEngine::new(Box::new(BufReader::new(BrokenReader)));
        let result = engine.run(&mut |_frame: BeatFrame<'_>| ControlFlow::Continue(()));
        match result {
            Err(EngineError::Failed(msg)) => assert!(msg.contains("device unplugged")),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
