//! Channel carrying beat predictions from a blocking producer thread into
//! the async runtime.
//!
//! The producer side is plain synchronous code and may be called from a
//! thread with no runtime. The consumer side is async and cancel-safe. Every
//! producer run ends with exactly one terminal message, `Terminate` or
//! `Failure`: sending one closes the sender, and dropping an unfinished
//! sender sends it on the producer's behalf (as `Failure` when the thread is
//! unwinding from a panic).

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::{EngineError, TempoError};
use crate::rhythm::Prediction;

/// Message crossing the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Prediction(Prediction),
    /// Normal end of stream.
    Terminate,
    /// The producer failed; this is also the end of stream.
    Failure(EngineError),
}

impl BridgeMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BridgeMessage::Prediction(_))
    }
}

/// Returned by the sender once the stream is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeClosed {
    #[error("terminal message already sent")]
    Finished,
    #[error("bridge consumer dropped")]
    ConsumerGone,
}

enum Tx {
    Bounded(mpsc::Sender<BridgeMessage>),
    Unbounded(mpsc::UnboundedSender<BridgeMessage>),
}

impl Tx {
    fn deliver(&self, msg: BridgeMessage) -> Result<(), BridgeClosed> {
        match self {
            Tx::Bounded(tx) => tx.blocking_send(msg).map_err(|_| BridgeClosed::ConsumerGone),
            Tx::Unbounded(tx) => tx.send(msg).map_err(|_| BridgeClosed::ConsumerGone),
        }
    }
}

enum Rx {
    Bounded(mpsc::Receiver<BridgeMessage>),
    Unbounded(mpsc::UnboundedReceiver<BridgeMessage>),
}

/// Create a bridge whose sender blocks while `capacity` messages are queued.
pub fn event_bridge(capacity: usize) -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BridgeSender { tx: Some(Tx::Bounded(tx)) },
        BridgeReceiver { rx: Rx::Bounded(rx), finished: false },
    )
}

/// Create a bridge whose sender never blocks.
pub fn unbounded_event_bridge() -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        BridgeSender { tx: Some(Tx::Unbounded(tx)) },
        BridgeReceiver { rx: Rx::Unbounded(rx), finished: false },
    )
}

/// Producer end. Must not be used from inside an async task when bounded.
pub struct BridgeSender {
    tx: Option<Tx>,
}

impl BridgeSender {
    /// Send a message, blocking while a bounded bridge is full.
    ///
    /// A terminal message closes the sender.
    pub fn send(&mut self, msg: BridgeMessage) -> Result<(), BridgeClosed> {
        if msg.is_terminal() {
            let tx = self.tx.take().ok_or(BridgeClosed::Finished)?;
            tx.deliver(msg)
        } else {
            self.tx.as_ref().ok_or(BridgeClosed::Finished)?.deliver(msg)
        }
    }

    pub fn send_prediction(&mut self, prediction: Prediction) -> Result<(), BridgeClosed> {
        self.send(BridgeMessage::Prediction(prediction))
    }

    /// End the stream with `Terminate` or `Failure`.
    pub fn finish(mut self, result: Result<(), EngineError>) {
        let msg = match result {
            Ok(()) => BridgeMessage::Terminate,
            Err(e) => BridgeMessage::Failure(e),
        };
        if let Err(e) = self.send(msg) {
            log::debug!("Terminal bridge message not delivered: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }
}

impl Drop for BridgeSender {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let msg = if std::thread::panicking() {
            BridgeMessage::Failure(EngineError::Panicked(
                "beat source thread panicked".to_string(),
            ))
        } else {
            BridgeMessage::Terminate
        };
        let delivered = match &tx {
            // blocking_send panics inside a runtime, which aborts while unwinding.
            Tx::Bounded(bounded) if tokio::runtime::Handle::try_current().is_ok() => bounded
                .try_send(msg)
                .map_err(|_| BridgeClosed::ConsumerGone),
            _ => tx.deliver(msg),
        };
        if let Err(e) = delivered {
            log::debug!("Terminal bridge message not delivered on drop: {}", e);
        }
    }
}

/// Consumer end, used from async code.
pub struct BridgeReceiver {
    rx: Rx,
    finished: bool,
}

impl BridgeReceiver {
    /// Wait for the next message. Cancel-safe.
    ///
    /// Once a terminal message has been received every further call returns
    /// `Terminate` immediately.
    pub async fn receive(&mut self) -> Result<BridgeMessage, TempoError> {
        if self.finished {
            return Ok(BridgeMessage::Terminate);
        }
        let msg = match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        };
        match msg {
            Some(msg) => {
                if msg.is_terminal() {
                    self.finished = true;
                }
                Ok(msg)
            }
            None => {
                self.finished = true;
                Err(TempoError::BridgeDisconnected)
            }
        }
    }

    /// Like [`receive`](Self::receive), giving up after `timeout` with `Ok(None)`.
    pub async fn receive_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<BridgeMessage>, TempoError> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Next prediction, `None` at the end of stream, or the producer's failure.
    pub async fn next_prediction(&mut self) -> Result<Option<Prediction>, TempoError> {
        match self.receive().await? {
            BridgeMessage::Prediction(prediction) => Ok(Some(prediction)),
            BridgeMessage::Terminate => Ok(None),
            BridgeMessage::Failure(e) => Err(TempoError::EngineFailure(e)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn prediction(bpm: f64) -> Prediction {
        Prediction {
            bpm,
            next_beat_epoch: 0.0,
            delta: 0.0,
        }
    }

    #[tokio::test]
    async fn test_predictions_then_terminate_in_order() {
        let (mut tx, mut rx) = unbounded_event_bridge();
        let handle = thread::spawn(move || {
            for bpm in [100.0, 110.0, 120.0] {
                tx.send_prediction(prediction(bpm)).unwrap();
            }
            tx.finish(Ok(()));
        });

        let mut received = Vec::new();
        while let Some(p) = rx.next_prediction().await.unwrap() {
            received.push(p.bpm);
        }
        handle.join().unwrap();
        assert_eq!(received, vec![100.0, 110.0, 120.0]);
        assert!(rx.is_finished());
        assert_eq!(rx.receive().await.unwrap(), BridgeMessage::Terminate);
    }

    #[tokio::test]
    async fn test_bounded_bridge_blocks_and_preserves_order() {
        let (mut tx, mut rx) = event_bridge(1);
        let handle = thread::spawn(move || {
            for i in 0..20 {
                tx.send_prediction(prediction(i as f64)).unwrap();
            }
        });

        let mut received = Vec::new();
        while let Some(p) = rx.next_prediction().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(1)).await;
            received.push(p.bpm as usize);
        }
        handle.join().unwrap();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failure_is_terminal_and_surfaced() {
        let (mut tx, mut rx) = unbounded_event_bridge();
        thread::spawn(move || {
            tx.send_prediction(prediction(90.0)).unwrap();
            tx.finish(Err(EngineError::Failed("input device lost".to_string())));
        });

        assert_eq!(rx.next_prediction().await.unwrap().unwrap().bpm, 90.0);
        match rx.next_prediction().await {
            Err(TempoError::EngineFailure(EngineError::Failed(msg))) => {
                assert_eq!(msg, "input device lost")
            }
            other => panic!("expected engine failure, got {:?}", other),
        }
        assert_eq!(rx.next_prediction().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_sender_terminates() {
        let (tx, mut rx) = unbounded_event_bridge();
        thread::spawn(move || drop(tx)).join().unwrap();
        assert_eq!(rx.receive().await.unwrap(), BridgeMessage::Terminate);
    }

    #[tokio::test]
    async fn test_bounded_sender_dropped_inside_runtime() {
        let (tx, mut rx) = event_bridge(4);
        drop(tx);
        assert_eq!(rx.receive().await.unwrap(), BridgeMessage::Terminate);
    }

    #[tokio::test]
    async fn test_full_bounded_sender_dropped_inside_runtime() {
        let (mut tx, mut rx) = event_bridge(1);
        let tx = thread::spawn(move || {
            tx.send_prediction(prediction(100.0)).unwrap();
            tx
        })
        .join()
        .unwrap();
        // No room for the terminal message; dropping must not block or panic.
        drop(tx);

        assert_eq!(rx.next_prediction().await.unwrap().unwrap().bpm, 100.0);
        assert!(matches!(rx.receive().await, Err(TempoError::BridgeDisconnected)));
    }

    #[tokio::test]
    async fn test_panicking_producer_reports_failure() {
        let (tx, mut rx) = unbounded_event_bridge();
        let result = thread::spawn(move || {
            let _tx = tx;
            panic!("engine exploded");
        })
        .join();
        assert!(result.is_err());

        assert!(matches!(
            rx.receive().await.unwrap(),
            BridgeMessage::Failure(EngineError::Panicked(_))
        ));
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_message() {
        let (mut tx, mut rx) = unbounded_event_bridge();
        tx.send(BridgeMessage::Terminate).unwrap();
        assert_eq!(tx.send(BridgeMessage::Terminate), Err(BridgeClosed::Finished));
        assert_eq!(
            tx.send_prediction(prediction(60.0)),
            Err(BridgeClosed::Finished)
        );
        assert!(tx.is_finished());
        drop(tx);

        assert_eq!(rx.receive().await.unwrap(), BridgeMessage::Terminate);
        // The channel is closed now; no second terminal was queued.
        match &mut rx.rx {
            Rx::Unbounded(inner) => assert!(inner.recv().await.is_none()),
            Rx::Bounded(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (mut tx, mut rx) = unbounded_event_bridge();
        let waited = rx.receive_timeout(Duration::from_millis(20)).await.unwrap();
        assert_eq!(waited, None);

        tx.send_prediction(prediction(128.0)).unwrap();
        let msg = rx.receive_timeout(Duration::from_millis(20)).await.unwrap();
        assert_eq!(msg, Some(BridgeMessage::Prediction(prediction(128.0))));
    }

    #[test]
    fn test_send_after_consumer_dropped() {
        let (mut tx, rx) = unbounded_event_bridge();
        drop(rx);
        assert_eq!(
            tx.send_prediction(prediction(60.0)),
            Err(BridgeClosed::ConsumerGone)
        );
    }
}
