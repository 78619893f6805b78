use crate::error::{ConnectError, ExecError};
use crate::udbc::DEFAULT_DB_NAME;
use crate::udbc::connection::Connection;
use crate::udbc::driver::Driver;
use crate::udbc_memory::connection::MemoryConnection;
use crate::udbc_memory::store::Tables;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const MEMORY_TYPE: &str = "memory";

/// Operation at which a scripted fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Execute,
    Begin,
    Commit,
    Rollback,
}

#[derive(Default)]
pub(crate) struct Faults {
    queued: HashMap<FaultPoint, VecDeque<ExecError>>,
    failed_connects: usize,
}

/// State shared between the driver and every connection it opened.
pub(crate) struct Shared {
    pub tables: Mutex<Tables>,
    pub faults: Mutex<Faults>,
    pub latency: Mutex<Duration>,
    pub opened: AtomicU64,
    pub closed: AtomicU64,
    pub executed: AtomicU64,
    pub open_now: AtomicUsize,
    pub peak_open: AtomicUsize,
}

impl Shared {
    pub fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops the next scripted fault for `point`, if any.
    pub fn fault(&self, point: FaultPoint) -> Option<ExecError> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued
            .get_mut(&point)
            .and_then(VecDeque::pop_front)
    }

    pub fn latency(&self) -> Duration {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Driver for the in-memory store. Clones share the same tables and counters.
#[derive(Clone)]
pub struct MemoryDriver {
    name: String,
    connect_retries: u32,
    shared: Arc<Shared>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_DB_NAME.to_string(),
            connect_retries: 0,
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::new()),
                faults: Mutex::new(Faults::default()),
                latency: Mutex::new(Duration::ZERO),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                executed: AtomicU64::new(0),
                open_now: AtomicUsize::new(0),
                peak_open: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Makes the next statement, begin, commit or rollback fail with `error`.
    /// Faults queued on the same point fire in order.
    pub fn inject(&self, point: FaultPoint, error: ExecError) {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed_connects = n;
    }

    /// Delay added to every statement.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn opened(&self) -> u64 {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> u64 {
        self.shared.executed.load(Ordering::SeqCst)
    }

    /// Most connections that were open at the same time.
    pub fn peak_open(&self) -> usize {
        self.shared.peak_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn r#type(&self) -> &str {
        MEMORY_TYPE
    }

    async fn open(&self) -> Result<Box<dyn Connection>, ConnectError> {
        {
            let mut faults = self
                .shared
                .faults
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if faults.failed_connects > 0 {
                faults.failed_connects -= 1;
                return Err(ConnectError::new(&self.name, "connection refused"));
            }
        }
        let id = self.shared.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.shared.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_open.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection::new(id, self.shared.clone())))
    }

    fn connect_retries(&self) -> u32 {
        self.connect_retries
    }
}
