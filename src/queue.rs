//! Bounded handoff from the decode workers to the UI thread.
//!
//! Producers block (in short slices) when the queue is full instead of
//! dropping results. The consumer only ever drains without blocking, and
//! never more than a fixed batch per tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError, bounded};

use crate::error::SortError;
use crate::prepare::{PreparedImage, TargetSize};

const BACKPRESSURE_SLICE: Duration = Duration::from_millis(50);

/// One finished preparation, matched to its pair by identity.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub identity: PathBuf,
    pub target: TargetSize,
    pub outcome: Result<PreparedImage, String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// The consumer is gone; the result can be discarded.
    Disconnected,
    /// Shutdown was requested while waiting for space.
    Quit,
}

#[derive(Clone)]
pub struct LoadSender {
    tx: Sender<LoadResult>,
    capacity: usize,
    quit: Arc<AtomicBool>,
}

pub struct LoadReceiver {
    rx: Receiver<LoadResult>,
    capacity: usize,
}

/// Create a queue holding at most `capacity` undelivered results.
pub fn load_queue(capacity: usize, quit: Arc<AtomicBool>) -> (LoadSender, LoadReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    (LoadSender { tx, capacity, quit }, LoadReceiver { rx, capacity })
}

impl LoadSender {
    pub fn send(&self, result: LoadResult) -> Result<(), SendError> {
        let mut pending = match self.tx.try_send(result) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => return Err(SendError::Disconnected),
            Err(TrySendError::Full(r)) => r,
        };

        log::warn!("{}, worker waiting", SortError::QueueOverflow { capacity: self.capacity });
        loop {
            if self.quit.load(Ordering::Relaxed) {
                return Err(SendError::Quit);
            }
            match self.tx.send_timeout(pending, BACKPRESSURE_SLICE) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(SendError::Disconnected),
                Err(SendTimeoutError::Timeout(r)) => pending = r,
            }
        }
    }
}

impl LoadReceiver {
    /// Take up to `max` waiting results without blocking.
    pub fn drain(&self, max: usize) -> Vec<LoadResult> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(r) => out.push(r),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
