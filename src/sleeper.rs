//! Waiting for tokens to refill.
//!
//! Async callers wait through a [`Sleeper`]; blocking callers park through a
//! [`BlockingStrategy`]. Both are injectable so tests can run without real delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Abstraction for sleeping in async code.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production sleeper using tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test sleeper that doesn't actually sleep
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}

/// The wait was cut short by [`InterruptibleParker::interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Parks the calling thread while a reservation matures.
pub trait BlockingStrategy: Send + Sync + std::fmt::Debug {
    /// Block for `nanos`. Returns `Err(Interrupted)` if the wait was cancelled.
    fn park(&self, nanos: i64) -> Result<(), Interrupted>;
}

/// Parks with `std::thread::sleep`; never interrupted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadParker;

impl BlockingStrategy for ThreadParker {
    fn park(&self, nanos: i64) -> Result<(), Interrupted> {
        if nanos > 0 {
            std::thread::sleep(Duration::from_nanos(nanos as u64));
        }
        Ok(())
    }
}

/// Parker that another thread can interrupt.
///
/// The interrupt flag is sticky: once set, every later `park` fails immediately until
/// [`clear`](Self::clear) is called, so an interrupt is never lost.
#[derive(Debug, Clone, Default)]
pub struct InterruptibleParker {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl InterruptibleParker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake any parked thread and fail its wait.
    pub fn interrupt(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        cvar.notify_all();
    }

    /// Whether an interrupt is pending.
    pub fn is_interrupted(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset the interrupt flag.
    pub fn clear(&self) {
        *self.inner.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
    }
}

impl BlockingStrategy for InterruptibleParker {
    fn park(&self, nanos: i64) -> Result<(), Interrupted> {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + Duration::from_nanos(nanos.max(0) as u64);
        let mut interrupted = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if *interrupted {
                return Err(Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (guard, _) = cvar
                .wait_timeout(interrupted, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            interrupted = guard;
        }
    }
}

/// Test sleeper that records every requested wait, for both async and blocking callers.
#[derive(Debug, Clone)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self { calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }

    fn record(&self, duration: Duration) {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(duration);
    }
}

impl Default for TrackingSleeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.record(duration);
        Box::pin(async {})
    }
}

impl BlockingStrategy for TrackingSleeper {
    fn park(&self, nanos: i64) -> Result<(), Interrupted> {
        self.record(Duration::from_nanos(nanos.max(0) as u64));
        Ok(())
    }
}
