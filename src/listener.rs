//! Bucket events and the sinks that receive them.
//!
//! Every bucket handle (local bucket, proxy, optimizer) reports what it did as a
//! [`BucketEvent`] to an [`EventSink`]. Sinks are called inline on the caller's thread,
//! so they must be cheap and must not block.
//!
//! # Event Types
//!
//! - **Consumption**: `Consumed`, `Rejected`
//! - **Waiting**: `Parked`, `Delayed`, `Interrupted`
//! - **Optimization**: `Merged`, `Skipped`, `SyncedRemotely`

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Something a bucket handle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketEvent {
    /// Tokens were taken.
    Consumed {
        /// Tokens consumed.
        tokens: i64,
    },
    /// A request was refused for lack of tokens.
    Rejected {
        /// Tokens requested.
        tokens: i64,
    },
    /// A blocking caller parked its thread while a reservation matured.
    Parked {
        /// Park duration in nanoseconds.
        nanos: i64,
    },
    /// An async caller slept while a reservation matured.
    Delayed {
        /// Sleep duration in nanoseconds.
        nanos: i64,
    },
    /// A blocking wait was interrupted.
    Interrupted {
        /// Tokens that remain reserved.
        tokens: i64,
    },
    /// Several commands were merged into one remote request.
    Merged {
        /// Commands in the merged request.
        commands: usize,
    },
    /// A command was served from the local copy without a remote request.
    Skipped {
        /// Tokens consumed locally.
        tokens: i64,
    },
    /// Local state was synchronized with storage.
    SyncedRemotely {
        /// Locally consumed tokens that were pushed to storage.
        postponed_tokens: i64,
    },
}

impl fmt::Display for BucketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketEvent::Consumed { tokens } => write!(f, "Consumed(tokens={})", tokens),
            BucketEvent::Rejected { tokens } => write!(f, "Rejected(tokens={})", tokens),
            BucketEvent::Parked { nanos } => write!(f, "Parked(nanos={})", nanos),
            BucketEvent::Delayed { nanos } => write!(f, "Delayed(nanos={})", nanos),
            BucketEvent::Interrupted { tokens } => write!(f, "Interrupted(tokens={})", tokens),
            BucketEvent::Merged { commands } => write!(f, "Merged(commands={})", commands),
            BucketEvent::Skipped { tokens } => write!(f, "Skipped(tokens={})", tokens),
            BucketEvent::SyncedRemotely { postponed_tokens } => {
                write!(f, "SyncedRemotely(postponed={})", postponed_tokens)
            }
        }
    }
}

/// Receives bucket events.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn on_event(&self, event: BucketEvent);
}

/// Shared sink handle stored by buckets.
pub type SharedSink = Arc<dyn EventSink>;

/// The default sink: a [`NullSink`].
pub fn null_sink() -> SharedSink {
    Arc::new(NullSink)
}

/// A no-op sink that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: BucketEvent) {}
}

/// A sink that logs events using the `tracing` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: BucketEvent) {
        tracing::info!(event = %event, "bucket_event");
    }
}

/// A sink that stores the most recent events in memory.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<BucketEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<BucketEvent> {
        self.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped because the sink was full.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<BucketEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: BucketEvent) {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
    }
}

/// Totals accumulated by a [`CountingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventCounts {
    pub consumed_tokens: u64,
    pub rejected_tokens: u64,
    pub parked_nanos: u64,
    pub delayed_nanos: u64,
    pub interrupts: u64,
    pub merged_commands: u64,
    pub skipped_tokens: u64,
    pub remote_syncs: u64,
}

/// Lock-free counters over the event stream.
#[derive(Clone, Debug, Default)]
pub struct CountingSink {
    counters: Arc<[AtomicU64; 8]>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> EventCounts {
        let load = |i: usize| self.counters[i].load(Ordering::Relaxed);
        EventCounts {
            consumed_tokens: load(0),
            rejected_tokens: load(1),
            parked_nanos: load(2),
            delayed_nanos: load(3),
            interrupts: load(4),
            merged_commands: load(5),
            skipped_tokens: load(6),
            remote_syncs: load(7),
        }
    }

    fn add(&self, slot: usize, amount: i64) {
        self.counters[slot].fetch_add(u64::try_from(amount).unwrap_or(0), Ordering::Relaxed);
    }
}

impl EventSink for CountingSink {
    fn on_event(&self, event: BucketEvent) {
        match event {
            BucketEvent::Consumed { tokens } => self.add(0, tokens),
            BucketEvent::Rejected { tokens } => self.add(1, tokens),
            BucketEvent::Parked { nanos } => self.add(2, nanos),
            BucketEvent::Delayed { nanos } => self.add(3, nanos),
            BucketEvent::Interrupted { .. } => self.add(4, 1),
            BucketEvent::Merged { commands } => self.add(5, i64::try_from(commands).unwrap_or(i64::MAX)),
            BucketEvent::Skipped { tokens } => self.add(6, tokens),
            BucketEvent::SyncedRemotely { .. } => self.add(7, 1),
        }
    }
}

/// Forwards every event to two sinks.
#[derive(Clone, Debug)]
pub struct MulticastSink {
    first: SharedSink,
    second: SharedSink,
}

impl MulticastSink {
    pub fn new(first: SharedSink, second: SharedSink) -> Self {
        Self { first, second }
    }
}

impl EventSink for MulticastSink {
    fn on_event(&self, event: BucketEvent) {
        self.first.on_event(event);
        self.second.on_event(event);
    }
}
