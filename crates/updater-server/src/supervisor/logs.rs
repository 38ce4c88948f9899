use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use updater_core::proto::{LogEntry, LogStream};
use updater_utils::now_millis;

/// Capacity of the server log channel.
pub const LOG_CHANNEL_CAPACITY: usize = 100;

/// Bounded FIFO of server output lines. Producers never block: when the buffer is
/// full the oldest line is dropped to make room.
#[derive(Clone)]
pub struct LogChannel {
    inner: Arc<LogShared>,
}

struct LogShared {
    state: Mutex<LogState>,
    notify: Notify,
}

struct LogState {
    buffer: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl LogChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(LogShared {
                state: Mutex::new(LogState {
                    buffer: VecDeque::with_capacity(capacity),
                    capacity,
                    dropped: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn push(&self, source: LogStream, text: impl Into<String>) {
        self.push_entry(LogEntry {
            at_ms: now_millis(),
            source,
            text: text.into(),
        });
    }

    pub fn push_entry(&self, entry: LogEntry) {
        {
            let mut guard = self.lock();
            let capacity = guard.capacity;
            if push_bounded(&mut guard.buffer, capacity, entry) {
                guard.dropped += 1;
            }
        }
        self.inner.notify.notify_one();
    }

    pub fn try_recv(&self) -> Option<LogEntry> {
        self.lock().buffer.pop_front()
    }

    /// Wait for the next line.
    pub async fn recv(&self) -> LogEntry {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(entry) = self.try_recv() {
                return entry;
            }
            notified.await;
        }
    }

    /// Take every buffered line, oldest first.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.lock().buffer.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Lines discarded because no one consumed them in time.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new(LOG_CHANNEL_CAPACITY)
    }
}

fn push_bounded(buf: &mut VecDeque<LogEntry>, capacity: usize, entry: LogEntry) -> bool {
    let mut dropped = false;
    while buf.len() >= capacity {
        buf.pop_front();
        dropped = true;
    }
    buf.push_back(entry);
    dropped
}
