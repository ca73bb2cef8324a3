//! The [`Sequencer`] façade and the state it shares with its background
//! tasks.

use super::actualizer;
use super::cache::NumberCache;
use super::error::SequencerError;
use super::flusher;
use super::params::Params;
use super::retry::{OnExhausted, RetryError};
use super::storage::SeqStorage;
use super::types::{Number, NumberKey, PLogOffset, SeqId, Status, WsId, WsKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Values handed over by `flush` and not yet durably written.
#[derive(Debug, Default)]
pub(crate) struct ToBeFlushed {
    pub(crate) values: HashMap<NumberKey, Number>,
    pub(crate) offset: Option<PLogOffset>,
}

/// A running flusher and the token that stops it.
#[derive(Debug)]
pub(crate) struct FlusherHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub(crate) struct Tasks {
    actualizer: Option<JoinHandle<()>>,
    flusher: Option<FlusherHandle>,
}

/// State shared between the façade, the flusher and the actualizer.
pub(crate) struct Shared<S> {
    pub(crate) params: Params,
    pub(crate) storage: S,
    pub(crate) cache: NumberCache,
    to_be_flushed: Mutex<ToBeFlushed>,
    /// Smallest offset the next transaction may use.
    pub(crate) next_offset: AtomicU64,
    pub(crate) status: watch::Sender<Status>,
    pub(crate) flush_requested: Notify,
    /// Root token. Cancelled by teardown only.
    pub(crate) cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl<S: SeqStorage> Shared<S> {
    fn new(params: Params, storage: S) -> Self {
        let (status, _) = watch::channel(Status::Actualizing);
        Self {
            cache: NumberCache::new(params.lru_cache_size),
            params,
            storage,
            to_be_flushed: Mutex::new(ToBeFlushed::default()),
            next_offset: AtomicU64::new(0),
            status,
            flush_requested: Notify::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub(crate) fn lock_pending(&self) -> MutexGuard<'_, ToBeFlushed> {
        self.to_be_flushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn num_unflushed(&self) -> usize {
        self.lock_pending().values.len()
    }

    fn pending_value(&self, key: &NumberKey) -> Option<Number> {
        self.lock_pending().values.get(key).copied()
    }

    /// Spawns a new actualizer unless the engine is being torn down.
    fn spawn_actualizer(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if self.cancel.is_cancelled() {
            return;
        }
        let shared = Arc::clone(self);
        tasks.actualizer = Some(tokio::spawn(actualizer::run(shared)));
    }

    /// Spawns the flusher unless the engine is being torn down.
    pub(crate) fn start_flusher(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if self.cancel.is_cancelled() {
            return;
        }
        let cancel = self.cancel.child_token();
        let join = tokio::spawn(flusher::run(Arc::clone(self), cancel.clone()));
        tasks.flusher = Some(FlusherHandle { cancel, join });
        debug!("flusher started");
    }

    pub(crate) fn take_flusher(&self) -> Option<FlusherHandle> {
        self.lock_tasks().flusher.take()
    }

    /// Moves the engine from `Ready` to `Actualizing` and spawns the
    /// actualizer. Returns `false` if the engine was not ready.
    pub(crate) fn begin_actualization(self: &Arc<Self>, reason: &'static str) -> bool {
        let switched = self.status.send_if_modified(|status| {
            if *status == Status::Ready {
                *status = Status::Actualizing;
                true
            } else {
                false
            }
        });
        if switched {
            info!(reason, "actualization requested");
            self.cache.purge();
            self.spawn_actualizer();
        }
        switched
    }

    /// Applies the escalation carried by a failed retry loop.
    pub(crate) fn escalate(self: &Arc<Self>, err: RetryError) {
        let RetryError::Exhausted {
            operation,
            action,
            source,
            ..
        } = err
        else {
            return;
        };

        match action {
            OnExhausted::Actualize => {
                if !self.begin_actualization(operation) {
                    debug!(operation, "actualization already in progress");
                }
            }
            OnExhausted::Abort => {
                self.fail(format!("{operation}: {source}"));
            }
        }
    }

    pub(crate) fn fail(&self, message: String) {
        error!(message = %message, "sequencer failed, instance must be recreated");
        self.status.send_replace(Status::Failed { message });
    }

    async fn join_tasks(&self) {
        let actualizer = self.lock_tasks().actualizer.take();
        if let Some(join) = actualizer {
            if let Err(err) = join.await {
                warn!(error = %err, "actualizer task ended abnormally");
            }
        }

        if let Some(flusher) = self.take_flusher() {
            flusher.cancel.cancel();
            if let Err(err) = flusher.join.await {
                warn!(error = %err, "flusher task ended abnormally");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transaction {
    ws_kind: WsKind,
    ws_id: WsId,
    plog_offset: PLogOffset,
}

/// Single-writer sequence-number engine.
///
/// A `Sequencer` hands out strictly increasing numbers per
/// [`NumberKey`] inside short transactions:
///
/// 1. [`start`](Self::start) opens a transaction for one workspace and
///    returns the PLog offset the caller will write its record at.
/// 2. [`next`](Self::next) allocates numbers, resolving the current value
///    through the LRU cache, the in-process table, the pending-flush table,
///    storage and finally the configured initial value.
/// 3. [`flush`](Self::flush) commits the allocated numbers to the
///    background flusher, or [`actualize`](Self::actualize) discards them
///    and rebuilds state from the PLog.
///
/// Every transactional method takes `&mut self`, so the single-writer
/// contract is checked at compile time.
///
/// # Examples
///
/// ```
/// use sequencer_rs::sequencer::{MemStorage, Params, Sequencer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), sequencer_rs::sequencer::SequencerError> {
/// let params = Params::new().with_seq_type(1, 1, 0);
/// let mut sequencer = Sequencer::new(params, MemStorage::new())?;
/// sequencer.wait_ready().await?;
///
/// if let Some(offset) = sequencer.start(1, 42).await {
///     let first = sequencer.next(1).await?;
///     assert_eq!(first, 1);
///     assert_eq!(offset, 1);
///     sequencer.flush();
/// }
///
/// sequencer.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Sequencer<S: SeqStorage> {
    shared: Arc<Shared<S>>,
    txn: Option<Transaction>,
    inproc: HashMap<NumberKey, Number>,
}

impl<S: SeqStorage> Sequencer<S> {
    /// Validates `params` and starts the initial actualization in the
    /// background.
    ///
    /// The returned instance rejects transactions until
    /// [`wait_ready`](Self::wait_ready) resolves.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::InvalidParams`] if `params` fails
    /// validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(params: Params, storage: S) -> Result<Self, SequencerError> {
        params.validate()?;

        let shared = Arc::new(Shared::new(params, storage));
        info!(
            lru_cache_size = shared.params.lru_cache_size,
            max_num_unflushed_values = shared.params.max_num_unflushed_values,
            flush_interval_ms = shared.params.flush_interval_ms,
            "sequencer created"
        );
        shared.spawn_actualizer();

        Ok(Self {
            shared,
            txn: None,
            inproc: HashMap::new(),
        })
    }

    /// Waits until the current actualization has finished.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::ActualizationFailed`] if the engine entered
    /// the failed state, or [`SequencerError::Cancelled`] if it was torn down.
    pub async fn wait_ready(&self) -> Result<(), SequencerError> {
        let mut status = self.shared.status.subscribe();
        let result = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(SequencerError::Cancelled),
            result = status.wait_for(|s| *s != Status::Actualizing) => result,
        };

        match result.map(|status| (*status).clone()) {
            Ok(Status::Failed { message }) => Err(SequencerError::ActualizationFailed { message }),
            Ok(_) => Ok(()),
            Err(_) => Err(SequencerError::Cancelled),
        }
    }

    /// Opens a transaction for workspace `ws_id` of kind `ws_kind`.
    ///
    /// Returns the PLog offset assigned to the transaction, or `None` if the
    /// engine is actualizing, too many values are waiting for the flusher,
    /// or reading the durable offset failed. In the last case actualization
    /// has been started.
    ///
    /// # Panics
    ///
    /// Panics if a transaction is already active, if `ws_kind` is not
    /// configured, or if the engine has failed.
    pub async fn start(&mut self, ws_kind: WsKind, ws_id: WsId) -> Option<PLogOffset> {
        assert!(
            self.txn.is_none(),
            "start called while a transaction is active"
        );
        let shared = &self.shared;

        match shared.status.borrow().clone() {
            Status::Ready => {}
            Status::Actualizing => {
                debug!(ws_kind, ws_id, "start rejected, actualization in progress");
                return None;
            }
            Status::Failed { message } => panic!("start called on a failed sequencer: {message}"),
        }
        assert!(
            shared.params.has_ws_kind(ws_kind),
            "unknown workspace kind {ws_kind}"
        );

        let unflushed = shared.num_unflushed();
        if unflushed >= shared.params.max_num_unflushed_values {
            warn!(
                unflushed,
                max = shared.params.max_num_unflushed_values,
                "start rejected, too many unflushed values"
            );
            super::metrics::backpressure_rejection();
            shared.flush_requested.notify_one();
            return None;
        }

        let storage = &shared.storage;
        let durable = shared
            .params
            .retry
            .run(
                "read_last_plog_offset",
                OnExhausted::Actualize,
                &shared.cancel,
                move || storage.read_last_plog_offset(),
            )
            .await;
        let durable = match durable {
            Ok(offset) => offset,
            Err(err) => {
                shared.escalate(err);
                return None;
            }
        };

        // The flusher may have escalated while we were reading.
        if *shared.status.borrow() != Status::Ready {
            return None;
        }

        let plog_offset = durable
            .saturating_add(1)
            .max(shared.next_offset.load(Ordering::SeqCst));
        self.txn = Some(Transaction {
            ws_kind,
            ws_id,
            plog_offset,
        });
        trace!(ws_kind, ws_id, plog_offset, "transaction started");
        Some(plog_offset)
    }

    /// Allocates the next number of `seq_id` in the active workspace.
    ///
    /// # Errors
    ///
    /// - [`SequencerError::UnknownSeqId`] if `seq_id` is not configured for
    ///   the active workspace kind. The transaction stays usable.
    /// - [`SequencerError::TransactionAborted`] if the stored number could
    ///   not be read. The transaction is over, its numbers are kept and
    ///   actualization has started.
    /// - [`SequencerError::Overflow`] if the counter is exhausted.
    /// - [`SequencerError::Cancelled`] if the engine is being torn down.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is active.
    pub async fn next(&mut self, seq_id: SeqId) -> Result<Number, SequencerError> {
        let Some(txn) = self.txn else {
            panic!("next called outside a transaction");
        };
        let Some(initial) = self.shared.params.initial_value(txn.ws_kind, seq_id) else {
            return Err(SequencerError::UnknownSeqId {
                ws_kind: txn.ws_kind,
                seq_id,
            });
        };

        let key = NumberKey::new(txn.ws_id, seq_id);
        let current = match self.current_number(key, initial).await {
            Ok(current) => current,
            Err(RetryError::Cancelled) => return Err(SequencerError::Cancelled),
            Err(err) => {
                self.hand_off();
                let aborted = SequencerError::from(err.clone());
                self.shared.escalate(err);
                warn!(ws_id = txn.ws_id, %key, "transaction aborted, stored number unreadable");
                return Err(aborted);
            }
        };
        let value = current
            .checked_add(1)
            .ok_or(SequencerError::Overflow { key })?;

        self.shared.cache.put(key, value);
        self.inproc.insert(key, value);
        super::metrics::number_issued();
        Ok(value)
    }

    async fn current_number(&self, key: NumberKey, initial: Number) -> Result<Number, RetryError> {
        let shared = &self.shared;

        if let Some(value) = shared.cache.get(&key) {
            trace!(%key, value, "resolved from cache");
            return Ok(value);
        }
        if let Some(&value) = self.inproc.get(&key) {
            trace!(%key, value, "resolved from in-process values");
            return Ok(value);
        }
        if let Some(value) = shared.pending_value(&key) {
            trace!(%key, value, "resolved from pending values");
            return Ok(value);
        }

        let storage = &shared.storage;
        let seq_ids = [key.seq_id];
        let seq_ids = &seq_ids;
        let numbers = shared
            .params
            .retry
            .run(
                "read_numbers",
                OnExhausted::Actualize,
                &shared.cancel,
                move || storage.read_numbers(key.ws_id, seq_ids),
            )
            .await?;

        let stored = numbers.first().copied().unwrap_or_default();
        if stored == 0 {
            trace!(%key, initial, "resolved from initial value");
            return Ok(initial);
        }
        trace!(%key, value = stored, "resolved from storage");
        shared.cache.put(key, stored);
        Ok(stored)
    }

    /// Commits the active transaction: its numbers and offset are handed to
    /// the flusher. Never waits for storage.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is active.
    pub fn flush(&mut self) {
        let Some(txn) = self.txn.take() else {
            panic!("flush called outside a transaction");
        };
        let shared = &self.shared;

        let unflushed = {
            let mut pending = shared.lock_pending();
            // An actualization may have reseeded the cache since `next`.
            for (key, value) in self.inproc.drain() {
                pending.values.insert(key, value);
                shared.cache.put(key, value);
            }
            pending.offset = Some(
                pending
                    .offset
                    .map_or(txn.plog_offset, |offset| offset.max(txn.plog_offset)),
            );
            pending.values.len()
        };

        shared
            .next_offset
            .fetch_max(txn.plog_offset.saturating_add(1), Ordering::SeqCst);
        super::metrics::unflushed_values(unflushed);
        trace!(
            ws_id = txn.ws_id,
            plog_offset = txn.plog_offset,
            unflushed,
            "transaction flushed"
        );
    }

    /// Aborts the active transaction and rebuilds state by replaying the
    /// PLog in the background.
    ///
    /// Numbers allocated by the transaction are kept in the pending-flush
    /// table so that no value already handed out is ever reissued.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is active or if the engine is not ready
    /// (an actualization is already running, or the engine failed).
    pub fn actualize(&mut self) {
        let Some(txn) = self.hand_off() else {
            panic!("actualize called outside a transaction");
        };

        assert!(
            self.shared.begin_actualization("actualize"),
            "actualize called while the sequencer is not ready"
        );
        debug!(ws_id = txn.ws_id, plog_offset = txn.plog_offset, "transaction actualized");
    }

    /// Ends the active transaction without committing its offset. Its numbers
    /// are max-merged into the pending-flush table and the cache.
    fn hand_off(&mut self) -> Option<Transaction> {
        let txn = self.txn.take()?;
        let shared = &self.shared;

        let mut pending = shared.lock_pending();
        for (key, value) in self.inproc.drain() {
            let merged = pending
                .values
                .get(&key)
                .map_or(value, |&current| current.max(value));
            pending.values.insert(key, merged);
            shared.cache.put(key, merged);
        }
        Some(txn)
    }

    /// Cancels the flusher and the actualizer and waits for both to exit.
    pub async fn shutdown(self) {
        info!("sequencer shutting down");
        self.shared.cancel.cancel();
        self.shared.join_tasks().await;
        info!("sequencer shut down");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.shared.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.shared.status.subscribe()
    }

    /// Returns `true` while the PLog is being replayed.
    #[must_use]
    pub fn is_actualizing(&self) -> bool {
        *self.shared.status.borrow() == Status::Actualizing
    }

    /// Returns `true` between `start` and `flush`/`actualize`.
    #[must_use]
    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Number of values waiting for the flusher.
    #[must_use]
    pub fn num_unflushed(&self) -> usize {
        self.shared.num_unflushed()
    }

    /// The configuration this instance was built with.
    #[must_use]
    #[inline]
    pub fn params(&self) -> &Params {
        &self.shared.params
    }

    /// The storage adapter.
    #[must_use]
    #[inline]
    pub fn storage(&self) -> &S {
        &self.shared.storage
    }
}

impl<S: SeqStorage> Drop for Sequencer<S> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl<S: SeqStorage> std::fmt::Debug for Sequencer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("status", &self.status())
            .field("in_transaction", &self.in_transaction())
            .field("inproc", &self.inproc.len())
            .field("unflushed", &self.num_unflushed())
            .finish()
    }
}
