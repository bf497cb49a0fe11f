#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quadb_transaction::{
    ComponentError, ComponentId, Journal, TransactionCoordinator, TransactionalComponent, TxnId,
    TxnMode,
};

/// Shared record of component calls, as `label:phase` strings.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A component holding a single integer.
///
/// Each transaction works on its own copy of the committed value. The prepare blob is the
/// new value itself, so recovery overwrites rather than accumulates.
pub struct Register {
    id: ComponentId,
    committed: Mutex<i64>,
    views: Mutex<HashMap<TxnId, i64>>,
    fail_on: Mutex<Option<&'static str>>,
    calls: CallLog,
}

impl Register {
    pub fn new(label: &str, calls: CallLog) -> Arc<Self> {
        Arc::new(Self {
            id: ComponentId::from_label(label),
            committed: Mutex::new(0),
            views: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
            calls,
        })
    }

    pub fn committed(&self) -> i64 {
        *self.committed.lock()
    }

    pub fn get(&self, txn: TxnId) -> i64 {
        self.views.lock()[&txn]
    }

    pub fn set(&self, txn: TxnId, value: i64) {
        self.views.lock().insert(txn, value);
    }

    /// Makes the next call to `phase` fail.
    pub fn fail_on(&self, phase: &'static str) {
        *self.fail_on.lock() = Some(phase);
    }

    fn record(&self, phase: &'static str) -> Result<(), ComponentError> {
        self.calls.lock().push(format!("{}:{phase}", self.id.label()));
        let mut fail_on = self.fail_on.lock();
        if *fail_on == Some(phase) {
            *fail_on = None;
            return Err(format!("{} failed in {phase}", self.id.label()).into());
        }
        Ok(())
    }
}

impl TransactionalComponent for Register {
    fn component_id(&self) -> &ComponentId {
        &self.id
    }

    fn clean_start(&self) -> Result<(), ComponentError> {
        self.record("clean_start")
    }

    fn start_recovery(&self) -> Result<(), ComponentError> {
        self.record("start_recovery")
    }

    fn recover(&self, state: &[u8]) -> Result<(), ComponentError> {
        self.record("recover")?;
        let bytes: [u8; 8] = state.try_into()?;
        *self.committed.lock() = i64::from_le_bytes(bytes);
        Ok(())
    }

    fn finish_recovery(&self) -> Result<(), ComponentError> {
        self.record("finish_recovery")
    }

    fn begin(&self, txn: TxnId, _mode: TxnMode) -> Result<(), ComponentError> {
        self.record("begin")?;
        let value = *self.committed.lock();
        self.views.lock().insert(txn, value);
        Ok(())
    }

    fn commit_prepare(&self, txn: TxnId) -> Result<Option<Vec<u8>>, ComponentError> {
        self.record("prepare")?;
        Ok(Some(self.get(txn).to_le_bytes().to_vec()))
    }

    fn commit(&self, txn: TxnId) -> Result<(), ComponentError> {
        self.record("commit")?;
        *self.committed.lock() = self.get(txn);
        Ok(())
    }

    fn commit_end(&self, _txn: TxnId) -> Result<(), ComponentError> {
        self.record("commit_end")
    }

    fn abort(&self, _txn: TxnId) -> Result<(), ComponentError> {
        self.record("abort")
    }

    fn complete(&self, txn: TxnId) -> Result<(), ComponentError> {
        self.views.lock().remove(&txn);
        self.record("complete")
    }

    fn shutdown(&self) -> Result<(), ComponentError> {
        self.record("shutdown")
    }
}

/// A started in-memory coordinator over the given registers.
pub fn coordinator_with(registers: &[Arc<Register>]) -> Arc<TransactionCoordinator> {
    coordinator_over(Journal::in_memory(), registers)
}

pub fn coordinator_over(
    journal: Journal,
    registers: &[Arc<Register>],
) -> Arc<TransactionCoordinator> {
    let coordinator = TransactionCoordinator::new(journal);
    for register in registers {
        coordinator.add_component(register.clone()).unwrap();
    }
    coordinator.start().unwrap();
    coordinator
}

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Calls recorded for `phase`, in order.
pub fn calls_for(log: &CallLog, phase: &str) -> Vec<String> {
    let suffix = format!(":{phase}");
    log.lock()
        .iter()
        .filter(|c| c.ends_with(&suffix))
        .cloned()
        .collect()
}
