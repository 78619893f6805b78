use crate::error::ExecError;
use crate::udbc::connection::{Connection, RawResult};
use crate::udbc::value::Value;
use crate::udbc_memory::driver::{FaultPoint, Shared};
use crate::udbc_memory::store::{Command, Tables};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::trace;

/// One session on the memory store.
pub struct MemoryConnection {
    id: u64,
    shared: Arc<Shared>,
    /// Writes buffered by the open transaction, replayed on commit.
    pending: Option<Vec<Command>>,
    closed: bool,
}

impl MemoryConnection {
    pub(crate) fn new(id: u64, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            pending: None,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<(), ExecError> {
        if self.closed {
            Err(ExecError::Fatal(format!("memory session {} is closed", self.id)))
        } else {
            Ok(())
        }
    }

    fn run(&mut self, command: Command) -> Result<RawResult, ExecError> {
        let mut committed = self.shared.tables();
        let Some(pending) = self.pending.as_mut() else {
            return command.apply(&mut committed);
        };

        // The transaction sees committed data plus its own writes.
        let mut view: Tables = (*committed).clone();
        drop(committed);
        for earlier in pending.iter() {
            earlier.apply(&mut view)?;
        }
        let result = command.apply(&mut view)?;
        if command.is_write() {
            pending.push(command);
        }
        Ok(result)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<RawResult, ExecError> {
        self.check_open()?;
        let latency = self.shared.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.shared.executed.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.shared.fault(FaultPoint::Execute) {
            return Err(fault);
        }
        trace!(session = self.id, sql, "memory execute");
        let command = Command::parse(sql, args)?;
        self.run(command)
    }

    async fn begin(&mut self) -> Result<(), ExecError> {
        self.check_open()?;
        if let Some(fault) = self.shared.fault(FaultPoint::Begin) {
            return Err(fault);
        }
        if self.pending.is_some() {
            return Err(ExecError::Fatal("transaction already in progress".into()));
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ExecError> {
        self.check_open()?;
        if let Some(fault) = self.shared.fault(FaultPoint::Commit) {
            return Err(fault);
        }
        let pending = self
            .pending
            .take()
            .ok_or_else(|| ExecError::Fatal("no transaction in progress".into()))?;

        let mut tables = self.shared.tables();
        let mut staged = tables.clone();
        for command in &pending {
            command.apply(&mut staged)?;
        }
        *tables = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ExecError> {
        self.check_open()?;
        if let Some(fault) = self.shared.fault(FaultPoint::Rollback) {
            return Err(fault);
        }
        self.pending = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if !self.closed {
            self.closed = true;
            self.pending = None;
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
            self.shared.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
