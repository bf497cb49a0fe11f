//! Transaction coordinator: admission control, two-phase commit over the registered
//! components, journaling and startup recovery.
//!
//! Admission follows multiple-reader / single-writer (MR+SW): any number of read
//! transactions may be active alongside at most one write transaction. The writer slot
//! can also be taken without a transaction ([`TransactionCoordinator::exec_as_writer`]),
//! and exclusive mode drains every active transaction and holds off new ones until it is
//! released.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::component::{ComponentState, TransactionalComponent};
use crate::component_id::ComponentId;
use crate::error::{ComponentError, TransactionError, TransactionResult};
use crate::journal::Journal;
use crate::listener::TransactionListener;
use crate::transaction::{Transaction, TxnMode, TxnState};
use crate::txn_id::TxnIdGenerator;

type ShutdownHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct AdmissionState {
    active_readers: usize,
    active_writers: usize,
    writer_held: bool,
    exclusive: bool,
    exclusive_waiting: usize,
    retired: bool,
    needs_recovery: bool,
}

impl AdmissionState {
    fn active(&self) -> usize {
        self.active_readers + self.active_writers
    }

    fn check_open(&self) -> TransactionResult<()> {
        if self.retired {
            return Err(TransactionError::Retired);
        }
        if self.needs_recovery {
            return Err(TransactionError::NeedsRecovery);
        }
        Ok(())
    }

    fn blocks(&self, mode: TxnMode) -> bool {
        self.exclusive
            || self.exclusive_waiting > 0
            || (mode == TxnMode::Write && self.writer_held)
    }
}

/// Snapshot of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub begins: u64,
    pub read_begins: u64,
    pub write_begins: u64,
    pub finished: u64,
    pub active_readers: usize,
    pub active_writers: usize,
    pub data_version: u64,
}

/// A suspended transaction together with each component's view of it.
pub struct CoordinatorState {
    txn: Transaction,
    states: Vec<(ComponentId, ComponentState)>,
}

impl CoordinatorState {
    pub fn txn_id(&self) -> crate::TxnId {
        self.txn.id()
    }
}

pub struct TransactionCoordinator {
    this: Weak<TransactionCoordinator>,
    journal: Mutex<Journal>,
    components: RwLock<Vec<Arc<dyn TransactionalComponent>>>,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    config_locked: AtomicBool,
    started: AtomicBool,

    admission: Mutex<AdmissionState>,
    admission_changed: Condvar,
    /// Serializes component `begin` against the component `commit` phase, so a new
    /// transaction sees either all or none of a commit.
    commit_lock: Mutex<()>,

    txn_ids: TxnIdGenerator,
    data_version: AtomicU64,
    count_begin: AtomicU64,
    count_begin_read: AtomicU64,
    count_begin_write: AtomicU64,
    count_finished: AtomicU64,
}

impl TransactionCoordinator {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            journal: Mutex::new(journal),
            components: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            shutdown_hooks: Mutex::new(Vec::new()),
            config_locked: AtomicBool::new(false),
            started: AtomicBool::new(false),
            admission: Mutex::new(AdmissionState::default()),
            admission_changed: Condvar::new(),
            commit_lock: Mutex::new(()),
            txn_ids: TxnIdGenerator::new(),
            data_version: AtomicU64::new(0),
            count_begin: AtomicU64::new(0),
            count_begin_read: AtomicU64::new(0),
            count_begin_write: AtomicU64::new(0),
            count_finished: AtomicU64::new(0),
        })
    }

    // ========== CONFIGURATION ==========

    /// Registers a component. Components are visited in registration order for every
    /// phase, so a component another one depends on must be added first.
    pub fn add_component(&self, component: Arc<dyn TransactionalComponent>) -> TransactionResult<()> {
        if self.config_locked.load(Ordering::SeqCst) {
            return Err(TransactionError::ConfigurationLocked);
        }
        let mut components = self.components.write();
        if components
            .iter()
            .any(|c| c.component_id() == component.component_id())
        {
            return Err(TransactionError::DuplicateComponent(
                component.component_id().to_string(),
            ));
        }
        components.push(component);
        Ok(())
    }

    pub fn remove_component(&self, id: &ComponentId) -> TransactionResult<bool> {
        if self.config_locked.load(Ordering::SeqCst) {
            return Err(TransactionError::ConfigurationLocked);
        }
        let mut components = self.components.write();
        let before = components.len();
        components.retain(|c| c.component_id() != id);
        Ok(components.len() != before)
    }

    pub fn components(&self) -> Vec<Arc<dyn TransactionalComponent>> {
        self.components.read().clone()
    }

    /// Runs `action` in exclusive mode with the component configuration unlocked.
    pub fn modify_config<T>(&self, action: impl FnOnce(&Self) -> T) -> TransactionResult<T> {
        self.exec_exclusive(|| {
            self.config_locked.store(false, Ordering::SeqCst);
            let _relock = ConfigRelock(self);
            action(self)
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TransactionListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.shutdown_hooks.lock().push(Box::new(hook));
    }

    // ========== STARTUP & RECOVERY ==========

    /// Runs recovery and locks the component configuration. Must be called once before
    /// any transaction begins.
    pub fn start(&self) -> TransactionResult<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(TransactionError::AlreadyStarted);
        }
        self.recover()?;
        self.config_locked.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn recover(&self) -> TransactionResult<()> {
        let components = self.components();
        let mut journal = self.journal.lock();
        if journal.is_empty()? {
            for c in &components {
                c.clean_start()
                    .map_err(|source| component_error(c.as_ref(), "clean start", source))?;
            }
            return Ok(());
        }

        info!("journal not empty, starting recovery");
        let committed = journal.committed()?;
        for c in &components {
            c.start_recovery()
                .map_err(|source| component_error(c.as_ref(), "start recovery", source))?;
        }
        let mut replayed = 0usize;
        for group in &committed {
            for (id, state) in &group.states {
                match components.iter().find(|c| c.component_id() == id) {
                    Some(c) => {
                        c.recover(state)
                            .map_err(|source| component_error(c.as_ref(), "recover", source))?;
                        replayed += 1;
                    }
                    None => warn!(component = ?id, txn = %group.txn, "no component for journal entry"),
                }
            }
        }
        for c in &components {
            c.finish_recovery()
                .map_err(|source| component_error(c.as_ref(), "finish recovery", source))?;
        }
        journal.reset()?;
        info!(
            transactions = committed.len(),
            entries = replayed,
            "recovery finished"
        );
        Ok(())
    }

    // ========== TRANSACTIONS ==========

    /// Starts a transaction, blocking while exclusive mode is engaged or pending and, for
    /// a write transaction, while the writer slot is taken.
    pub fn begin(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        self.check_started()?;
        {
            let mut admission = self.admission.lock();
            loop {
                admission.check_open()?;
                if !admission.blocks(mode) {
                    break;
                }
                self.admission_changed.wait(&mut admission);
            }
            admission.admit(mode);
        }
        self.begin_components(mode)
    }

    /// As [`Self::begin`], but returns `None` instead of blocking.
    pub fn try_begin(&self, mode: TxnMode) -> TransactionResult<Option<Transaction>> {
        self.check_started()?;
        {
            let mut admission = self.admission.lock();
            admission.check_open()?;
            if admission.blocks(mode) {
                return Ok(None);
            }
            admission.admit(mode);
        }
        self.begin_components(mode).map(Some)
    }

    fn begin_components(&self, mode: TxnMode) -> TransactionResult<Transaction> {
        let begun = {
            let _serial = self.commit_lock.lock();
            self.txn_ids.next().and_then(|id| {
                let components = self.components.read();
                for (i, c) in components.iter().enumerate() {
                    if let Err(source) = c.begin(id, mode) {
                        for started in &components[..i] {
                            swallow(started.as_ref(), "abort", started.abort(id));
                            swallow(started.as_ref(), "complete", started.complete(id));
                        }
                        return Err(component_error(c.as_ref(), "begin", source));
                    }
                }
                Ok((id, self.data_version.load(Ordering::SeqCst)))
            })
        };
        let (id, data_version) = match begun {
            Ok(begun) => begun,
            Err(e) => {
                self.release(mode);
                return Err(e);
            }
        };
        let Some(coordinator) = self.this.upgrade() else {
            self.release(mode);
            return Err(TransactionError::Retired);
        };

        self.count_begin.fetch_add(1, Ordering::Relaxed);
        match mode {
            TxnMode::Read => self.count_begin_read.fetch_add(1, Ordering::Relaxed),
            TxnMode::Write => self.count_begin_write.fetch_add(1, Ordering::Relaxed),
        };
        debug!(txn = %id, ?mode, "begin");
        let txn = Transaction::new(id, mode, data_version, coordinator);
        self.notify(|l| l.notify_begin(&txn));
        Ok(txn)
    }

    /// Two-phase commit of a write transaction.
    ///
    /// Every component prepares, the prepare states are journaled and synced, and only
    /// then does every component commit. A failure before the journal write aborts the
    /// transaction. A failure after it leaves the journal in place and marks the
    /// coordinator as needing recovery.
    pub fn commit(&self, txn: &Transaction) -> TransactionResult<()> {
        self.check_owner(txn)?;
        if !txn.is_write() {
            return Err(TransactionError::ReadOnly(txn.id()));
        }
        let state = txn.state();
        if state != TxnState::Active {
            return Err(TransactionError::InvalidState {
                txn: txn.id(),
                state,
            });
        }
        let id = txn.id();
        let components = self.components();

        self.notify(|l| l.notify_prepare(txn));
        let mut prepared = Vec::new();
        for c in &components {
            match c.commit_prepare(id) {
                Ok(Some(state)) => prepared.push((c.component_id().clone(), state)),
                Ok(None) => {}
                Err(source) => {
                    let e = component_error(c.as_ref(), "prepare", source);
                    self.force_abort(txn, &components);
                    return Err(e);
                }
            }
        }

        if !prepared.is_empty() {
            if let Err(e) = self.journal.lock().append_commit(id, &prepared) {
                self.force_abort(txn, &components);
                return Err(e.into());
            }
        }

        {
            let _serial = self.commit_lock.lock();
            for c in &components {
                if let Err(source) = c.commit(id) {
                    error!(txn = %id, component = %c.component_id(), error = %source,
                        "commit failed after journal write, recovery required");
                    self.admission.lock().needs_recovery = true;
                    self.abandon(txn);
                    return Err(TransactionError::InternalConsistency {
                        component: c.component_id().to_string(),
                        source,
                    });
                }
            }
            self.data_version.fetch_add(1, Ordering::SeqCst);
        }

        for c in &components {
            swallow(c.as_ref(), "commit_end", c.commit_end(id));
        }
        if !prepared.is_empty() {
            if let Err(e) = self.journal.lock().reset() {
                warn!(txn = %id, error = %e, "failed to reset journal after commit");
            }
        }
        txn.set_state(TxnState::Committed);
        debug!(txn = %id, "commit");
        self.notify(|l| l.notify_commit(txn));
        Ok(())
    }

    pub fn abort(&self, txn: &Transaction) -> TransactionResult<()> {
        self.check_owner(txn)?;
        match txn.state() {
            TxnState::Active => {
                self.force_abort(txn, &self.components());
                Ok(())
            }
            TxnState::Aborted | TxnState::Ended => Ok(()),
            state => Err(TransactionError::InvalidState {
                txn: txn.id(),
                state,
            }),
        }
    }

    fn force_abort(&self, txn: &Transaction, components: &[Arc<dyn TransactionalComponent>]) {
        if txn.transition(TxnState::Active, TxnState::Aborted).is_err() {
            return;
        }
        let id = txn.id();
        for c in components {
            swallow(c.as_ref(), "abort", c.abort(id));
        }
        debug!(txn = %id, "abort");
        self.notify(|l| l.notify_abort(txn));
    }

    /// Gives up on a transaction whose journal entry is already durable. Components are
    /// not aborted: their prepared state belongs to the journal and is finished by
    /// recovery on the next start.
    fn abandon(&self, txn: &Transaction) {
        if txn.transition(TxnState::Active, TxnState::Aborted).is_err() {
            return;
        }
        debug!(txn = %txn.id(), "abandoned to recovery");
        self.notify(|l| l.notify_abort(txn));
    }

    /// Finishes a transaction. An uncommitted write transaction is aborted first.
    /// Calling `end` more than once has no further effect.
    pub fn end(&self, txn: &Transaction) -> TransactionResult<()> {
        self.check_owner(txn)?;
        let components = self.components();
        if txn.state() == TxnState::Detached {
            txn.transition(TxnState::Detached, TxnState::Active).ok();
        }
        if txn.is_write() {
            self.force_abort(txn, &components);
        }
        if txn.set_state(TxnState::Ended) == TxnState::Ended {
            return Ok(());
        }
        let id = txn.id();
        for c in &components {
            swallow(c.as_ref(), "complete", c.complete(id));
        }
        self.release(txn.mode());
        self.count_finished.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %id, "end");
        self.notify(|l| l.notify_end(txn));
        Ok(())
    }

    /// Suspends `txn` so it can be carried to another thread and resumed with
    /// [`Self::attach`].
    pub fn detach(&self, txn: Transaction) -> TransactionResult<CoordinatorState> {
        self.check_owner(&txn)?;
        if let Err(state) = txn.transition(TxnState::Active, TxnState::Detached) {
            return Err(TransactionError::InvalidState {
                txn: txn.id(),
                state,
            });
        }
        let mut states = Vec::new();
        for c in self.components() {
            match c.detach(txn.id()) {
                Ok(state) => states.push((c.component_id().clone(), state)),
                Err(source) => {
                    txn.set_state(TxnState::Active);
                    return Err(component_error(c.as_ref(), "detach", source));
                }
            }
        }
        Ok(CoordinatorState { txn, states })
    }

    pub fn attach(&self, state: CoordinatorState) -> TransactionResult<Transaction> {
        let CoordinatorState { txn, states } = state;
        self.check_owner(&txn)?;
        let components = self.components();
        for (id, component_state) in states {
            if let Some(c) = components.iter().find(|c| *c.component_id() == id) {
                c.attach(txn.id(), component_state)
                    .map_err(|source| component_error(c.as_ref(), "attach", source))?;
            }
        }
        if let Err(state) = txn.transition(TxnState::Detached, TxnState::Active) {
            return Err(TransactionError::InvalidState {
                txn: txn.id(),
                state,
            });
        }
        Ok(txn)
    }

    // ========== WRITER SLOT & EXCLUSIVE MODE ==========

    /// Takes the writer slot without starting a transaction. Blocks until the slot is
    /// free. Readers are unaffected.
    pub fn block_writers(&self) -> TransactionResult<()> {
        let mut admission = self.admission.lock();
        loop {
            admission.check_open()?;
            if !admission.writer_held {
                break;
            }
            self.admission_changed.wait(&mut admission);
        }
        admission.writer_held = true;
        Ok(())
    }

    pub fn try_block_writers(&self) -> TransactionResult<bool> {
        let mut admission = self.admission.lock();
        admission.check_open()?;
        if admission.writer_held {
            return Ok(false);
        }
        admission.writer_held = true;
        Ok(true)
    }

    /// Releases the writer slot taken by [`Self::block_writers`].
    pub fn enable_writers(&self) {
        self.admission.lock().writer_held = false;
        self.admission_changed.notify_all();
    }

    /// Runs `action` while holding the writer slot.
    ///
    /// The action must not begin a write transaction on this coordinator, directly or
    /// through a handoff: the slot is already held and the call would never return.
    pub fn exec_as_writer<T>(&self, action: impl FnOnce() -> T) -> TransactionResult<T> {
        self.block_writers()?;
        let _turn = WriterTurn(self);
        Ok(action())
    }

    /// Waits until no transaction is active, then holds off every new transaction until
    /// [`Self::finish_exclusive_mode`]. Only one caller holds exclusive mode at a time.
    ///
    /// The caller may hold the writer slot itself; exclusive mode only waits for
    /// transactions, not for the slot.
    pub fn start_exclusive_mode(&self) {
        let mut admission = self.admission.lock();
        admission.exclusive_waiting += 1;
        while admission.exclusive || admission.active() > 0 {
            self.admission_changed.wait(&mut admission);
        }
        admission.exclusive_waiting -= 1;
        admission.exclusive = true;
    }

    pub fn try_exclusive_mode(&self) -> bool {
        let mut admission = self.admission.lock();
        if admission.exclusive || admission.active() > 0 {
            return false;
        }
        admission.exclusive = true;
        true
    }

    pub fn finish_exclusive_mode(&self) {
        self.admission.lock().exclusive = false;
        self.admission_changed.notify_all();
    }

    pub fn exec_exclusive<T>(&self, action: impl FnOnce() -> T) -> TransactionResult<T> {
        self.start_exclusive_mode();
        let _exclusive = ExclusiveTurn(self);
        Ok(action())
    }

    /// Refuses every future transaction with [`TransactionError::Retired`] and wakes
    /// threads waiting to begin so they can look elsewhere.
    pub fn retire(&self) {
        self.admission.lock().retired = true;
        self.admission_changed.notify_all();
        info!("coordinator retired");
    }

    pub fn is_retired(&self) -> bool {
        self.admission.lock().retired
    }

    pub fn needs_recovery(&self) -> bool {
        self.admission.lock().needs_recovery
    }

    // ========== STATISTICS ==========

    pub fn data_version(&self) -> u64 {
        self.data_version.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CoordinatorStats {
        let admission = self.admission.lock();
        CoordinatorStats {
            begins: self.count_begin.load(Ordering::Relaxed),
            read_begins: self.count_begin_read.load(Ordering::Relaxed),
            write_begins: self.count_begin_write.load(Ordering::Relaxed),
            finished: self.count_finished.load(Ordering::Relaxed),
            active_readers: admission.active_readers,
            active_writers: admission.active_writers,
            data_version: self.data_version(),
        }
    }

    // ========== SHUTDOWN ==========

    /// Shuts every component down and runs the shutdown hooks.
    pub fn shutdown(&self) {
        let active = self.admission.lock().active();
        if active > 0 {
            warn!(active, "shutting down with active transactions");
        }
        for c in self.components() {
            swallow(c.as_ref(), "shutdown", c.shutdown());
        }
        let hooks = std::mem::take(&mut *self.shutdown_hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    // ========== INTERNALS ==========

    fn check_started(&self) -> TransactionResult<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransactionError::NotStarted)
        }
    }

    fn check_owner(&self, txn: &Transaction) -> TransactionResult<()> {
        if std::ptr::eq(Arc::as_ptr(txn.coordinator()), self) {
            Ok(())
        } else {
            Err(TransactionError::ForeignTransaction(txn.id()))
        }
    }

    fn release(&self, mode: TxnMode) {
        let mut admission = self.admission.lock();
        match mode {
            TxnMode::Read => admission.active_readers -= 1,
            TxnMode::Write => {
                admission.active_writers -= 1;
                admission.writer_held = false;
            }
        }
        drop(admission);
        self.admission_changed.notify_all();
    }

    fn notify(&self, f: impl Fn(&dyn TransactionListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

impl AdmissionState {
    fn admit(&mut self, mode: TxnMode) {
        match mode {
            TxnMode::Read => self.active_readers += 1,
            TxnMode::Write => {
                self.active_writers += 1;
                self.writer_held = true;
            }
        }
    }
}

struct WriterTurn<'a>(&'a TransactionCoordinator);

impl Drop for WriterTurn<'_> {
    fn drop(&mut self) {
        self.0.enable_writers();
    }
}

struct ExclusiveTurn<'a>(&'a TransactionCoordinator);

impl Drop for ExclusiveTurn<'_> {
    fn drop(&mut self) {
        self.0.finish_exclusive_mode();
    }
}

struct ConfigRelock<'a>(&'a TransactionCoordinator);

impl Drop for ConfigRelock<'_> {
    fn drop(&mut self) {
        if self.0.is_started() {
            self.0.config_locked.store(true, Ordering::SeqCst);
        }
    }
}

fn component_error(
    component: &dyn TransactionalComponent,
    phase: &'static str,
    source: ComponentError,
) -> TransactionError {
    TransactionError::Component {
        component: component.component_id().to_string(),
        phase,
        source,
    }
}

fn swallow(component: &dyn TransactionalComponent, phase: &str, result: Result<(), ComponentError>) {
    if let Err(e) = result {
        warn!(component = %component.component_id(), phase, error = %e, "ignoring component failure");
    }
}
