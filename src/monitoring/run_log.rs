//! Run Log Stream
//!
//! An append-only, bounded, timestamped log shared between the running
//! automation (producer) and any observer (consumer). Once the bound is
//! exceeded the oldest entries are dropped first.
//!
//! Every append is mirrored to the `log` facade under the
//! [`RUN_LOG_TARGET`] target, so headless runs still produce diagnostics.
//! Observers that want to follow the stream live call
//! [`LogStream::subscribe`] and read [`LogStream::entries_since`] on each
//! change.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use log::{warn, Level};
use tokio::sync::watch;

use crate::config::DEFAULT_LOG_CAPACITY;

/// `log` target used when mirroring stream entries.
pub const RUN_LOG_TARGET: &str = "autostep::run";

/// A single log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Position in the stream; never reused, survives `clear`
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

struct Buffer {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

struct Shared {
    capacity: usize,
    buffer: Mutex<Buffer>,
    appended: watch::Sender<u64>,
}

/// Cloneable handle to a shared, bounded log.
#[derive(Clone)]
pub struct LogStream {
    shared: Arc<Shared>,
}

impl LogStream {
    /// Creates a stream retaining at most `capacity` entries.
    ///
    /// A capacity of 0 is raised to 1 with a warning.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            warn!("Log capacity 0 is not usable, keeping the latest entry only");
        }
        let capacity = capacity.max(1);
        let (appended, _) = watch::channel(0);

        Self {
            shared: Arc::new(Shared {
                capacity,
                buffer: Mutex::new(Buffer {
                    entries: VecDeque::with_capacity(capacity),
                    next_seq: 0,
                }),
                appended,
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a message and returns its sequence number.
    pub fn append(&self, level: Level, message: impl Into<String>) -> u64 {
        let message = message.into();
        log::log!(target: RUN_LOG_TARGET, level, "{}", message);

        let mut buffer = self.buffer();
        let seq = buffer.next_seq;
        buffer.next_seq += 1;
        buffer.entries.push_back(LogEntry {
            seq,
            timestamp: Local::now(),
            level,
            message,
        });
        while buffer.entries.len() > self.shared.capacity {
            buffer.entries.pop_front();
        }
        self.shared.appended.send_replace(buffer.next_seq);

        seq
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.append(Level::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> u64 {
        self.append(Level::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.append(Level::Error, message)
    }

    /// Returns a copy of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer().entries.iter().cloned().collect()
    }

    /// Returns retained entries with `seq >= from`.
    pub fn entries_since(&self, from: u64) -> Vec<LogEntry> {
        self.buffer()
            .entries
            .iter()
            .filter(|e| e.seq >= from)
            .cloned()
            .collect()
    }

    /// Returns the retained entries rendered as `[HH:MM:SS] message`.
    pub fn lines(&self) -> Vec<String> {
        self.buffer().entries.iter().map(|e| e.to_string()).collect()
    }

    /// Joins all retained lines, ready to copy elsewhere.
    pub fn render(&self) -> String {
        self.lines().join("\n")
    }

    /// Returns true if any retained message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.buffer().entries.iter().any(|e| e.message.contains(needle))
    }

    /// Drops every retained entry. Sequence numbers keep counting.
    pub fn clear(&self) {
        let mut buffer = self.buffer();
        buffer.entries.clear();
        self.shared.appended.send_replace(buffer.next_seq);
    }

    /// Subscribes to appends; the value is the next sequence number.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.appended.subscribe()
    }

    /// Total number of entries ever appended.
    pub fn total_appended(&self) -> u64 {
        self.buffer().next_seq
    }

    pub fn len(&self) -> usize {
        self.buffer().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("capacity", &self.shared.capacity)
            .field("len", &self.len())
            .finish()
    }
}
