//! Coordinator for all outstanding asynchronous operations on one remote
//! group.
//!
//! Composes the callback subscription, the slot table, and a call gate:
//! admits requests into correlation slots, dispatches the four transport
//! callbacks to the matching pending request, republishes decoded item
//! batches on a general update broadcast, and performs bounded cooperative
//! bulk cancellation during shutdown.
//!
//! # Threading
//!
//! `add_request` may be called from arbitrary caller threads and blocks up
//! to the configured admission timeout. The callback handlers run on
//! transport delivery threads and never block or panic outward. The slot
//! table is the only synchronization point between the two sides.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::connection::{CallbackSink, CallbackSubscription, ConnectableSource, InterfaceId};
use crate::rpc::{CallGate, FaultHub};
use crate::transaction::error::CoordinatorError;
use crate::transaction::request::{AsyncRequest, DataChangeSink};
use crate::transaction::slots::SlotTable;
use crate::transaction::types::{ItemUpdateBatch, TransactionId};

/// Interface identity of the data-change callback sink
/// (`IOPCDataCallback`).
pub const DATA_CALLBACK_INTERFACE: InterfaceId =
    InterfaceId::new(0x39c1_3a70_011e_11d0_9675_0020_afd8_adb3);

/// Number of evenly spaced polls the bulk-cancellation wait performs
/// across its timeout.
const CANCEL_POLL_ATTEMPTS: u32 = 10;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    group_handle: u32,
    slots: SlotTable<Arc<dyn AsyncRequest>>,
    updates: broadcast::Sender<ItemUpdateBatch>,
    config: EngineConfig,
}

impl Shared {
    fn complete_request(&self, id: TransactionId) -> Option<Arc<dyn AsyncRequest>> {
        // Id 0 is reserved for unsolicited pushes; nothing is correlated.
        let slot = id.slot()?;
        let request = self.slots.remove(slot);
        if request.is_some() {
            tracing::trace!(txn_id = %id, "request removed");
        }
        request
    }

    /// Validates that a callback belongs to the owning group. A mismatch is
    /// a protocol violation: logged and dropped.
    fn check_group(&self, group_handle: u32, callback: &'static str) -> bool {
        if group_handle == self.group_handle {
            return true;
        }
        let err = CoordinatorError::CorrelationMismatch {
            what: "group handle",
            expected: self.group_handle,
            actual: group_handle,
        };
        tracing::error!(callback, error = %err, "dropping callback for wrong group");
        false
    }

    /// Removes the request correlated to `id`, asserting that its recorded
    /// id matches. A mismatch indicates cross-wiring between slots and the
    /// transport: logged, and the request's handlers are not invoked.
    fn take_correlated(
        &self,
        id: TransactionId,
        callback: &'static str,
    ) -> Option<Arc<dyn AsyncRequest>> {
        let request = self.complete_request(id)?;
        let recorded = request.transaction_id();
        if recorded != id {
            let err = CoordinatorError::CorrelationMismatch {
                what: "transaction id",
                expected: recorded.0,
                actual: id.0,
            };
            tracing::error!(callback, error = %err, "dropping cross-wired completion");
            return None;
        }
        Some(request)
    }

    fn publish_updates(&self, items: &ItemUpdateBatch) {
        if !items.is_empty() {
            let _ = self.updates.send(Arc::clone(items));
        }
    }

    fn handle_data_change(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_quality: i32,
        master_error: i32,
        items: &ItemUpdateBatch,
    ) {
        tracing::trace!(
            %txn_id,
            group_handle,
            master_quality,
            master_error,
            count = items.len(),
            "on data change"
        );
        if !self.check_group(group_handle, "data change") {
            return;
        }
        if txn_id.is_unsolicited() {
            self.publish_updates(items);
            return;
        }
        let Some(request) = self.take_correlated(txn_id, "data change") else {
            return;
        };
        invoke_handler("data change", || {
            request.on_data_change(master_quality, master_error, items);
        });
        // Correlated data changes are delivered twice by design: to the
        // request and to the general update broadcast.
        self.publish_updates(items);
    }

    fn handle_read_complete(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_quality: i32,
        master_error: i32,
        items: &ItemUpdateBatch,
    ) {
        tracing::trace!(
            %txn_id,
            group_handle,
            master_quality,
            master_error,
            count = items.len(),
            "on read complete"
        );
        if !self.check_group(group_handle, "read complete") {
            return;
        }
        let Some(request) = self.take_correlated(txn_id, "read complete") else {
            return;
        };
        invoke_handler("read complete", || {
            request.on_read_complete(master_quality, master_error, items);
        });
        self.publish_updates(items);
    }

    fn handle_write_complete(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_error: i32,
        client_handles: &[u32],
        statuses: &[i32],
    ) {
        tracing::trace!(%txn_id, group_handle, master_error, "on write complete");
        let Some(request) = self.take_correlated(txn_id, "write complete") else {
            return;
        };
        invoke_handler("write complete", || {
            request.on_write_complete(master_error, client_handles, statuses);
        });
    }

    fn handle_cancel_complete(&self, txn_id: TransactionId, group_handle: u32) {
        tracing::trace!(%txn_id, group_handle, "on cancel complete");
        let Some(request) = self.take_correlated(txn_id, "cancel complete") else {
            return;
        };
        invoke_handler("cancel complete", || request.on_cancel_complete());
    }

    fn cancel_all(self: &Arc<Self>, timeout: Duration) -> CancelOutcome {
        tracing::trace!(?timeout, "cancel all requested");
        for request in self.slots.snapshot() {
            invoke_handler("cancel", || request.cancel());
        }

        let (tx, rx) = mpsc::channel();

        if !self.slots.has_items() {
            let _ = tx.send(Ok(()));
            return CancelOutcome { rx, timeout };
        }

        let shared = Arc::clone(self);
        thread::spawn(move || {
            let interval = timeout / CANCEL_POLL_ATTEMPTS;
            for _ in 0..CANCEL_POLL_ATTEMPTS {
                thread::sleep(interval);
                if !shared.slots.has_items() {
                    tracing::trace!("all requests cancelled");
                    let _ = tx.send(Ok(()));
                    return;
                }
            }
            let err = CoordinatorError::CancelTimeout(timeout);
            tracing::error!(error = %err, pending = shared.slots.len(), "failed to cancel requests");
            let _ = tx.send(Err(err));
        });

        CancelOutcome { rx, timeout }
    }
}

/// Invokes a request hook, catching panics so transport dispatch and
/// teardown are never corrupted by user code.
fn invoke_handler(context: &'static str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(context, "request handler panicked");
    }
}

// ---------------------------------------------------------------------------
// TransactionSink
// ---------------------------------------------------------------------------

/// The callback sink the coordinator registers with the remote source.
///
/// Holds shared state weakly so a sink the transport retains past
/// coordinator teardown delivers into nothing instead of keeping the
/// engine alive.
pub struct TransactionSink {
    shared: Weak<Shared>,
}

impl CallbackSink for TransactionSink {
    fn interface_id() -> InterfaceId {
        DATA_CALLBACK_INTERFACE
    }
}

impl DataChangeSink for TransactionSink {
    fn on_data_change(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_quality: i32,
        master_error: i32,
        items: ItemUpdateBatch,
    ) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_data_change(txn_id, group_handle, master_quality, master_error, &items);
        }
    }

    fn on_read_complete(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_quality: i32,
        master_error: i32,
        items: ItemUpdateBatch,
    ) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_read_complete(txn_id, group_handle, master_quality, master_error, &items);
        }
    }

    fn on_write_complete(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_error: i32,
        client_handles: &[u32],
        statuses: &[i32],
    ) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_write_complete(txn_id, group_handle, master_error, client_handles, statuses);
        }
    }

    fn on_cancel_complete(&self, txn_id: TransactionId, group_handle: u32) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_cancel_complete(txn_id, group_handle);
        }
    }
}

// ---------------------------------------------------------------------------
// CancelOutcome
// ---------------------------------------------------------------------------

/// Outcome handle of a bulk cancellation.
///
/// The wait itself runs in the background; the caller may await the
/// outcome, poll it, or drop it.
pub struct CancelOutcome {
    rx: mpsc::Receiver<Result<(), CoordinatorError>>,
    timeout: Duration,
}

impl CancelOutcome {
    /// Blocks until the background wait finishes. Bounded: the wait always
    /// terminates within its timeout.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::CancelTimeout`] if requests were still pending
    /// when the timeout elapsed.
    pub fn join(self) -> Result<(), CoordinatorError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::CancelTimeout(self.timeout)),
        }
    }

    /// Blocks up to `wait` for the background wait to finish.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::CancelTimeout`] if the outcome did not arrive in
    /// time or requests were still pending.
    pub fn wait(self, wait: Duration) -> Result<(), CoordinatorError> {
        match self.rx.recv_timeout(wait) {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::CancelTimeout(self.timeout)),
        }
    }

    /// Returns the outcome if the background wait already finished.
    #[must_use]
    pub fn try_wait(&self) -> Option<Result<(), CoordinatorError>> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// TransactionCoordinator
// ---------------------------------------------------------------------------

/// Orchestrator for all outstanding asynchronous operations on one remote
/// group.
///
/// Shutdown is idempotent and runs on every exit path: explicitly via
/// [`shutdown`](Self::shutdown) or from `Drop`.
pub struct TransactionCoordinator {
    shared: Arc<Shared>,
    subscription: CallbackSubscription<TransactionSink>,
    gate: CallGate,
    disposed: AtomicBool,
}

impl TransactionCoordinator {
    /// Creates a coordinator for the group identified by `group_handle`
    /// without connecting it; see [`connect`](Self::connect).
    ///
    /// Remote-call faults raised through this coordinator's
    /// [`gate`](Self::gate) carry the group handle as context.
    #[must_use]
    pub fn new(group_handle: u32, faults: FaultHub, config: EngineConfig) -> Self {
        let shared = Arc::new(Shared {
            group_handle,
            slots: SlotTable::new(config.max_pending_requests),
            updates: broadcast::channel(config.update_buffer_size).0,
            config,
        });
        let sink = Arc::new(TransactionSink {
            shared: Arc::downgrade(&shared),
        });
        let gate = CallGate::with_context(faults, Arc::new(group_handle));
        Self {
            shared,
            subscription: CallbackSubscription::new(sink),
            gate,
            disposed: AtomicBool::new(false),
        }
    }

    /// Creates a coordinator and attempts (non-fatally) to register its
    /// callback sink with `source`. A source lacking the data-change
    /// connection point leaves the coordinator disconnected; admission
    /// then fails with [`CoordinatorError::NotConnected`].
    #[must_use]
    pub fn connect(
        group_handle: u32,
        source: &dyn ConnectableSource<TransactionSink>,
        faults: FaultHub,
        config: EngineConfig,
    ) -> Self {
        let coordinator = Self::new(group_handle, faults, config);
        coordinator.subscription.try_connect(source);
        coordinator
    }

    /// Returns `true` while the callback sink is registered.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.subscription.is_connected()
    }

    /// Returns `true` iff at least one request is pending.
    #[must_use]
    pub fn has_pending_requests(&self) -> bool {
        self.shared.slots.has_items()
    }

    /// Returns the number of pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.slots.len()
    }

    /// Returns the call gate for remote calls on this group's objects.
    #[must_use]
    pub fn gate(&self) -> &CallGate {
        &self.gate
    }

    /// Registers a subscriber on the general update broadcast, which
    /// carries every decoded item batch from any source — unsolicited
    /// pushes and correlated data-change/read completions alike.
    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<ItemUpdateBatch> {
        self.shared.updates.subscribe()
    }

    /// Admits a request, assigning it a transaction id.
    ///
    /// Blocks up to the configured admission timeout waiting for a free
    /// correlation slot.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::NotConnected`] if the callback subscription is
    /// inactive; [`CoordinatorError::CapacityExceeded`] if no slot freed
    /// within the timeout.
    pub fn add_request(
        &self,
        request: Arc<dyn AsyncRequest>,
    ) -> Result<TransactionId, CoordinatorError> {
        if !self.is_connected() {
            return Err(CoordinatorError::NotConnected);
        }

        let timeout = self.shared.config.request_timeout;
        let Some(index) = self.shared.slots.try_add(Arc::clone(&request), timeout) else {
            return Err(CoordinatorError::CapacityExceeded(timeout));
        };

        let id = TransactionId::from_slot(index);
        request.on_added(id);
        tracing::trace!(txn_id = %id, kind = ?request.operation(), "request added");
        Ok(id)
    }

    /// Removes and returns the request correlated to `id`.
    ///
    /// Returns `None` for [`TransactionId::UNSOLICITED`] (reserved for
    /// subscription pushes) and for duplicate, stale, or already-cancelled
    /// completions.
    pub fn complete_request(&self, id: TransactionId) -> Option<Arc<dyn AsyncRequest>> {
        self.shared.complete_request(id)
    }

    /// Asks every pending request to cancel cooperatively, then waits in
    /// the background — polling at ten equally spaced sub-intervals of
    /// `timeout` — for the table to drain.
    #[must_use]
    pub fn cancel_all(&self, timeout: Duration) -> CancelOutcome {
        self.shared.cancel_all(timeout)
    }

    /// Shuts the coordinator down: disposes the slot table (unblocking any
    /// admission waiters), cancels and drains pending requests bounded by
    /// the configured shutdown timeout, and disconnects the callback
    /// subscription. Idempotent; failures are logged, never propagated.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.slots.dispose();
        let outcome = self.shared.cancel_all(self.shared.config.shutdown_timeout);
        if let Err(err) = outcome.join() {
            tracing::error!(error = %err, "cancellation during shutdown failed");
        }
        self.subscription.disconnect();
        tracing::trace!(group_handle = self.shared.group_handle, "coordinator shut down");
    }
}

impl Drop for TransactionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::sync::Mutex;

    use crate::connection::{ConnectionPoint, RegistrationToken};
    use crate::rpc::TransportError;
    use crate::transaction::request::OperationKind;
    use crate::transaction::types::{ItemUpdate, ItemValue, Quality};

    // -- mock transport --

    #[derive(Default)]
    struct SinkSlot {
        sink: Mutex<Option<Arc<TransactionSink>>>,
    }

    struct FakePoint {
        slot: Arc<SinkSlot>,
    }

    impl ConnectionPoint<TransactionSink> for FakePoint {
        fn advise(&self, sink: Arc<TransactionSink>) -> Result<RegistrationToken, TransportError> {
            *self.slot.sink.lock().unwrap() = Some(sink);
            Ok(RegistrationToken(1))
        }

        fn unadvise(&self, _token: RegistrationToken) -> Result<(), TransportError> {
            *self.slot.sink.lock().unwrap() = None;
            Ok(())
        }
    }

    /// A connectable source capturing the advised sink so tests can fire
    /// transport callbacks.
    struct FakeServer {
        slot: Arc<SinkSlot>,
        has_point: bool,
    }

    impl FakeServer {
        fn new() -> Self {
            Self {
                slot: Arc::new(SinkSlot::default()),
                has_point: true,
            }
        }

        fn without_connection_point() -> Self {
            Self {
                slot: Arc::new(SinkSlot::default()),
                has_point: false,
            }
        }

        fn sink(&self) -> Arc<TransactionSink> {
            Arc::clone(self.slot.sink.lock().unwrap().as_ref().unwrap())
        }
    }

    impl ConnectableSource<TransactionSink> for FakeServer {
        fn find_connection_point(
            &self,
        ) -> Result<Arc<dyn ConnectionPoint<TransactionSink>>, TransportError> {
            if self.has_point {
                Ok(Arc::new(FakePoint {
                    slot: Arc::clone(&self.slot),
                }))
            } else {
                Err(TransportError::MissingConnectionPoint {
                    interface: <TransactionSink as CallbackSink>::interface_id(),
                })
            }
        }
    }

    // -- test request --

    #[derive(Default)]
    struct TestRequest {
        id: AtomicU32,
        reads: AtomicUsize,
        data_changes: AtomicUsize,
        cancel_completes: AtomicUsize,
        cancels: AtomicUsize,
        write_statuses: Mutex<Vec<i32>>,
        seen_items: Mutex<Vec<ItemUpdate>>,
    }

    impl AsyncRequest for TestRequest {
        fn transaction_id(&self) -> TransactionId {
            TransactionId(self.id.load(Ordering::SeqCst))
        }

        fn operation(&self) -> OperationKind {
            OperationKind::Read
        }

        fn on_added(&self, id: TransactionId) {
            self.id.store(id.0, Ordering::SeqCst);
        }

        fn on_data_change(&self, _mq: i32, _me: i32, items: &ItemUpdateBatch) {
            self.data_changes.fetch_add(1, Ordering::SeqCst);
            self.seen_items.lock().unwrap().extend(items.iter().cloned());
        }

        fn on_read_complete(&self, _mq: i32, _me: i32, items: &ItemUpdateBatch) {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.seen_items.lock().unwrap().extend(items.iter().cloned());
        }

        fn on_write_complete(&self, _me: i32, _handles: &[u32], statuses: &[i32]) {
            self.write_statuses.lock().unwrap().extend_from_slice(statuses);
        }

        fn on_cancel_complete(&self) {
            self.cancel_completes.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    // -- helpers --

    const GROUP: u32 = 7;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            max_pending_requests: 4,
            request_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        }
    }

    fn connected() -> (FakeServer, TransactionCoordinator) {
        let server = FakeServer::new();
        let coordinator =
            TransactionCoordinator::connect(GROUP, &server, FaultHub::default(), quick_config());
        assert!(coordinator.is_connected());
        (server, coordinator)
    }

    fn update(client_handle: u32) -> ItemUpdate {
        ItemUpdate {
            client_handle,
            value: ItemValue::I32(41),
            quality: Quality::GOOD,
            timestamp: 0,
            status: 0,
        }
    }

    fn batch(handles: &[u32]) -> ItemUpdateBatch {
        handles.iter().map(|&h| update(h)).collect::<Vec<_>>().into()
    }

    // -- admission --

    #[test]
    fn test_add_request_assigns_slot_plus_one() {
        let (_server, coordinator) = connected();

        let a = Arc::new(TestRequest::default());
        let b = Arc::new(TestRequest::default());
        assert_eq!(coordinator.add_request(a.clone()).unwrap(), TransactionId(1));
        assert_eq!(coordinator.add_request(b.clone()).unwrap(), TransactionId(2));
        assert_eq!(a.transaction_id(), TransactionId(1));
        assert_eq!(b.transaction_id(), TransactionId(2));
        assert_eq!(coordinator.pending_count(), 2);
    }

    #[test]
    fn test_add_request_not_connected() {
        let server = FakeServer::without_connection_point();
        let coordinator =
            TransactionCoordinator::connect(GROUP, &server, FaultHub::default(), quick_config());

        assert!(!coordinator.is_connected());
        let err = coordinator
            .add_request(Arc::new(TestRequest::default()))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotConnected));
    }

    #[test]
    fn test_add_request_capacity_exceeded() {
        let (_server, coordinator) = connected();

        for _ in 0..4 {
            coordinator
                .add_request(Arc::new(TestRequest::default()))
                .unwrap();
        }
        let err = coordinator
            .add_request(Arc::new(TestRequest::default()))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::CapacityExceeded(_)));
    }

    #[test]
    fn test_concurrent_admission_distinct_ids() {
        let server = FakeServer::new();
        let config = EngineConfig {
            max_pending_requests: 8,
            ..quick_config()
        };
        let coordinator = Arc::new(TransactionCoordinator::connect(
            GROUP,
            &server,
            FaultHub::default(),
            config,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    coordinator
                        .add_request(Arc::new(TestRequest::default()))
                        .unwrap()
                        .0
                })
            })
            .collect();

        let mut ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u32>>());
    }

    // -- completion correlation --

    #[test]
    fn test_complete_request_zero_always_empty() {
        let (_server, coordinator) = connected();
        coordinator
            .add_request(Arc::new(TestRequest::default()))
            .unwrap();

        assert!(coordinator.complete_request(TransactionId::UNSOLICITED).is_none());
        assert_eq!(coordinator.pending_count(), 1);
    }

    #[test]
    fn test_read_complete_round_trip() {
        let (server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        let id = coordinator.add_request(request.clone()).unwrap();
        let mut updates = coordinator.subscribe_updates();

        let sink = server.sink();
        sink.on_read_complete(id, GROUP, 0, 0, batch(&[1, 2]));

        assert_eq!(request.reads.load(Ordering::SeqCst), 1);
        assert_eq!(request.seen_items.lock().unwrap().len(), 2);
        assert!(!coordinator.has_pending_requests());

        // The same decoded batch is republished on the update broadcast.
        assert_eq!(updates.try_recv().unwrap().len(), 2);

        // A duplicate completion for the same id is dropped silently.
        sink.on_read_complete(id, GROUP, 0, 0, batch(&[1, 2]));
        assert_eq!(request.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsolicited_push_only_broadcasts() {
        let (server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        coordinator.add_request(request.clone()).unwrap();
        let mut updates = coordinator.subscribe_updates();

        server
            .sink()
            .on_data_change(TransactionId::UNSOLICITED, GROUP, 0, 0, batch(&[9]));

        // Broadcast fired, no pending request touched.
        assert_eq!(updates.try_recv().unwrap()[0].client_handle, 9);
        assert!(coordinator.has_pending_requests());
        assert_eq!(request.data_changes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_correlated_data_change_delivers_twice() {
        let (server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        let id = coordinator.add_request(request.clone()).unwrap();
        let mut updates = coordinator.subscribe_updates();

        server.sink().on_data_change(id, GROUP, 0, 0, batch(&[3]));

        assert_eq!(request.data_changes.load(Ordering::SeqCst), 1);
        assert_eq!(updates.try_recv().unwrap()[0].client_handle, 3);
    }

    #[test]
    fn test_write_complete_carries_statuses_only() {
        let (server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        let id = coordinator.add_request(request.clone()).unwrap();
        let mut updates = coordinator.subscribe_updates();

        server
            .sink()
            .on_write_complete(id, GROUP, 0, &[1, 2], &[0, -1]);

        assert_eq!(*request.write_statuses.lock().unwrap(), vec![0, -1]);
        assert!(request.seen_items.lock().unwrap().is_empty());
        // Write completions never reach the update broadcast.
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_cancel_complete_round_trip() {
        let (server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        let id = coordinator.add_request(request.clone()).unwrap();

        server.sink().on_cancel_complete(id, GROUP);

        assert_eq!(request.cancel_completes.load(Ordering::SeqCst), 1);
        assert!(!coordinator.has_pending_requests());
    }

    #[test]
    fn test_wrong_group_handle_dropped() {
        let (server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        let id = coordinator.add_request(request.clone()).unwrap();

        server.sink().on_read_complete(id, GROUP + 1, 0, 0, batch(&[1]));

        // Protocol violation: dropped before completion lookup.
        assert_eq!(request.reads.load(Ordering::SeqCst), 0);
        assert!(coordinator.has_pending_requests());
    }

    #[test]
    fn test_stale_transaction_id_dropped() {
        let (server, _coordinator) = connected();

        // No request pending at id 3.
        server.sink().on_read_complete(TransactionId(3), GROUP, 0, 0, batch(&[1]));
        server.sink().on_cancel_complete(TransactionId(3), GROUP);
    }

    #[test]
    fn test_cross_wired_transaction_id_not_delivered() {
        let (server, coordinator) = connected();

        // A request that lies about its recorded id.
        struct LyingRequest;
        impl AsyncRequest for LyingRequest {
            fn transaction_id(&self) -> TransactionId {
                TransactionId(99)
            }
            fn operation(&self) -> OperationKind {
                OperationKind::Read
            }
            fn on_added(&self, _id: TransactionId) {}
            fn on_read_complete(&self, _mq: i32, _me: i32, _items: &ItemUpdateBatch) {
                panic!("handler must not run for cross-wired completion");
            }
            fn cancel(&self) {}
        }

        let id = coordinator.add_request(Arc::new(LyingRequest)).unwrap();
        server.sink().on_read_complete(id, GROUP, 0, 0, batch(&[1]));

        // Removed from the table, handler skipped.
        assert!(!coordinator.has_pending_requests());
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let (server, coordinator) = connected();

        struct PanickingRequest {
            id: AtomicU32,
        }
        impl AsyncRequest for PanickingRequest {
            fn transaction_id(&self) -> TransactionId {
                TransactionId(self.id.load(Ordering::SeqCst))
            }
            fn operation(&self) -> OperationKind {
                OperationKind::Read
            }
            fn on_added(&self, id: TransactionId) {
                self.id.store(id.0, Ordering::SeqCst);
            }
            fn on_read_complete(&self, _mq: i32, _me: i32, _items: &ItemUpdateBatch) {
                panic!("deliberate test panic");
            }
            fn cancel(&self) {}
        }

        let mut updates = coordinator.subscribe_updates();
        let id = coordinator
            .add_request(Arc::new(PanickingRequest { id: AtomicU32::new(0) }))
            .unwrap();
        server.sink().on_read_complete(id, GROUP, 0, 0, batch(&[1]));

        // The panic is swallowed and the batch still republished.
        assert!(!coordinator.has_pending_requests());
        assert_eq!(updates.try_recv().unwrap().len(), 1);
    }

    // -- blocked admission unblocking on completion --

    #[test]
    fn test_completion_unblocks_pending_admission() {
        let server = FakeServer::new();
        let config = EngineConfig {
            max_pending_requests: 2,
            request_timeout: Duration::from_secs(5),
            ..quick_config()
        };
        let coordinator = Arc::new(TransactionCoordinator::connect(
            GROUP,
            &server,
            FaultHub::default(),
            config,
        ));

        let a = Arc::new(TestRequest::default());
        let b = Arc::new(TestRequest::default());
        assert_eq!(coordinator.add_request(a.clone()).unwrap(), TransactionId(1));
        assert_eq!(coordinator.add_request(b).unwrap(), TransactionId(2));

        let blocked = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                coordinator
                    .add_request(Arc::new(TestRequest::default()))
                    .unwrap()
            })
        };

        thread::sleep(Duration::from_millis(50));
        server.sink().on_read_complete(TransactionId(1), GROUP, 0, 0, batch(&[1]));

        // C inherits A's freed slot and therefore its id.
        assert_eq!(blocked.join().unwrap(), TransactionId(1));
        assert_eq!(a.reads.load(Ordering::SeqCst), 1);
    }

    // -- cancellation --

    #[test]
    fn test_cancel_all_succeeds_when_requests_clear() {
        let (_server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        let id = coordinator.add_request(request.clone()).unwrap();

        let timeout = Duration::from_millis(400);
        let outcome = coordinator.cancel_all(timeout);
        assert_eq!(request.cancels.load(Ordering::SeqCst), 1);

        // Simulate the remote cancel-complete arriving at T/4.
        thread::sleep(timeout / 4);
        coordinator.complete_request(id);

        let started = std::time::Instant::now();
        outcome.join().unwrap();
        assert!(started.elapsed() < timeout);
    }

    #[test]
    fn test_cancel_all_times_out_when_request_never_clears() {
        let (_server, coordinator) = connected();
        coordinator
            .add_request(Arc::new(TestRequest::default()))
            .unwrap();

        let outcome = coordinator.cancel_all(Duration::from_millis(200));
        let err = outcome.join().unwrap_err();
        assert!(matches!(err, CoordinatorError::CancelTimeout(_)));
        assert!(coordinator.has_pending_requests());
    }

    #[test]
    fn test_cancel_all_with_nothing_pending_is_immediate() {
        let (_server, coordinator) = connected();
        let outcome = coordinator.cancel_all(Duration::from_secs(10));
        outcome.join().unwrap();
    }

    // -- shutdown --

    #[test]
    fn test_shutdown_disconnects_and_is_idempotent() {
        let (server, coordinator) = connected();
        coordinator.shutdown();

        assert!(!coordinator.is_connected());
        assert!(server.slot.sink.lock().unwrap().is_none());

        // Second shutdown is a no-op.
        coordinator.shutdown();
    }

    #[test]
    fn test_shutdown_cancels_pending_requests() {
        let (_server, coordinator) = connected();
        let request = Arc::new(TestRequest::default());
        coordinator.add_request(request.clone()).unwrap();

        // The request never clears; shutdown still completes after the
        // bounded wait and logs the timeout.
        coordinator.shutdown();
        assert_eq!(request.cancels.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_connected());
    }

    #[test]
    fn test_drop_runs_shutdown() {
        let server = FakeServer::new();
        {
            let _coordinator = TransactionCoordinator::connect(
                GROUP,
                &server,
                FaultHub::default(),
                quick_config(),
            );
        }
        assert!(server.slot.sink.lock().unwrap().is_none());
    }

    #[test]
    fn test_callback_after_shutdown_is_harmless() {
        let (server, coordinator) = connected();
        let sink = server.sink();
        coordinator.shutdown();
        drop(coordinator);

        // The transport may still hold the sink; delivery goes nowhere.
        sink.on_read_complete(TransactionId(1), GROUP, 0, 0, batch(&[1]));
        sink.on_data_change(TransactionId::UNSOLICITED, GROUP, 0, 0, batch(&[2]));
    }
}
