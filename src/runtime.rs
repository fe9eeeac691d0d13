//! Runtime context providing time and ID generation.
//!
//! Delay nodes and approval expiry are pure functions of "now"; routing them
//! through [`TimeProvider`] keeps them testable without wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// Runtime context threaded through node dispatch.
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider),
            id_generator: Arc::new(RealIdGenerator),
        }
    }
}

impl RuntimeContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.time_provider.now()
    }

    pub fn next_id(&self) -> String {
        self.id_generator.next_id()
    }

    /// Deterministic context: fixed clock, sequential ids.
    pub fn fake() -> Self {
        Self {
            time_provider: Arc::new(FakeTimeProvider::new(1_710_504_000)),
            id_generator: Arc::new(FakeIdGenerator::new("id")),
        }
    }
}

pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

/// Fixed-clock provider for tests. The timestamp can be advanced to simulate
/// the passage of time across suspend/resume boundaries.
pub struct FakeTimeProvider {
    timestamp: parking_lot::RwLock<i64>,
}

impl FakeTimeProvider {
    pub fn new(fixed_timestamp: i64) -> Self {
        Self {
            timestamp: parking_lot::RwLock::new(fixed_timestamp),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.timestamp.write() += secs;
    }

    pub fn set(&self, timestamp: i64) {
        *self.timestamp.write() = timestamp;
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(*self.timestamp.read(), 0).unwrap()
    }
}

pub struct FakeIdGenerator {
    pub prefix: String,
    counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}
