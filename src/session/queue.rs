use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{AudioInputEvent, InputSource};

enum Slot {
    Frame(AudioInputEvent),
    End,
}

struct Shared {
    closed: Mutex<bool>,
    tx: mpsc::UnboundedSender<Slot>,
}

/// Producer side of a session's inbound audio FIFO.
///
/// The end marker is written at most once; frames pushed after it are refused.
#[derive(Clone)]
pub struct InputQueue {
    shared: Arc<Shared>,
}

/// Consumer side. Yields frames in push order, then `None` forever once the
/// end marker is reached.
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Slot>,
    finished: bool,
}

#[must_use]
pub fn input_queue() -> (InputQueue, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        closed: Mutex::new(false),
        tx,
    });
    (InputQueue { shared }, QueueReceiver { rx, finished: false })
}

impl InputQueue {
    /// Enqueue a frame. Returns `false` if the queue was already closed.
    pub fn push(&self, frame: AudioInputEvent) -> bool {
        let closed = self.shared.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        self.shared.tx.send(Slot::Frame(frame)).is_ok()
    }

    /// Enqueue the end marker. Returns `true` only for the call that wrote it.
    pub fn close(&self) -> bool {
        let mut closed = self.shared.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        *closed = true;
        // A dropped receiver already means "no more input".
        let _ = self.shared.tx.send(Slot::End);
        true
    }
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<AudioInputEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Slot::Frame(frame)) => Some(frame),
            Some(Slot::End) | None => {
                self.finished = true;
                None
            }
        }
    }
}

#[async_trait]
impl InputSource for QueueReceiver {
    async fn next_input(&mut self) -> Option<AudioInputEvent> {
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(byte: u8) -> AudioInputEvent {
        AudioInputEvent::pcm(vec![byte; 4], 16_000, 1)
    }

    #[tokio::test]
    async fn frames_arrive_in_order_then_end() {
        let (queue, mut rx) = input_queue();
        assert!(queue.push(frame(1)));
        assert!(queue.push(frame(2)));
        assert!(queue.close());

        assert_eq!(rx.recv().await, Some(frame(1)));
        assert_eq!(rx.recv().await, Some(frame(2)));
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn second_close_is_a_no_op() {
        let (queue, mut rx) = input_queue();
        assert!(queue.close());
        assert!(!queue.close());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn frames_after_close_are_refused() {
        let (queue, mut rx) = input_queue();
        queue.close();
        assert!(!queue.push(frame(3)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn clones_share_the_end_marker() {
        let (queue, mut rx) = input_queue();
        let other = queue.clone();
        assert!(other.close());
        assert!(!queue.close());
        assert_eq!(rx.recv().await, None);
    }
}
