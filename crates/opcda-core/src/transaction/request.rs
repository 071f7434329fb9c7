//! The pending-request contract and the inbound transport sink interface.
//!
//! Concrete read/write/refresh request types live outside this crate; the
//! coordinator consumes them only through [`AsyncRequest`]. The transport
//! delivers completions through [`DataChangeSink`], whose parameter shape
//! (transaction id, owning-group handle, master quality/error, decoded item
//! batch, `0` = unsolicited) mirrors the wire callback exactly.

use crate::transaction::types::{ItemUpdateBatch, TransactionId};

/// The kind of asynchronous operation a request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A subscription-driven refresh delivered via a data-change callback.
    DataChange,
    /// An asynchronous read.
    Read,
    /// An asynchronous write.
    Write,
    /// A cancellation of another outstanding operation.
    Cancel,
}

/// One outstanding asynchronous operation against the remote source.
///
/// Implementations are shared with the coordinator for the lifetime of the
/// operation, so all handlers take `&self`; interior mutability is the
/// implementor's concern. Completion handlers default to no-ops — a read
/// request typically only implements [`on_read_complete`].
///
/// Exactly one of the completion handlers (or a forced cancellation at
/// shutdown) ends the request's life; the coordinator guarantees a handler
/// is invoked at most once per admitted request.
///
/// [`on_read_complete`]: AsyncRequest::on_read_complete
pub trait AsyncRequest: Send + Sync {
    /// The transaction id assigned at admission, or
    /// [`TransactionId::UNSOLICITED`] before admission.
    fn transaction_id(&self) -> TransactionId;

    /// The operation kind, used for diagnostics.
    fn operation(&self) -> OperationKind;

    /// Records the transaction id assigned by the coordinator. Called
    /// exactly once, during admission.
    fn on_added(&self, id: TransactionId);

    /// A data-change completion correlated to this request arrived.
    fn on_data_change(&self, master_quality: i32, master_error: i32, items: &ItemUpdateBatch) {
        let _ = (master_quality, master_error, items);
    }

    /// A read completion arrived.
    fn on_read_complete(&self, master_quality: i32, master_error: i32, items: &ItemUpdateBatch) {
        let _ = (master_quality, master_error, items);
    }

    /// A write completion arrived. Write completions carry per-item status
    /// codes only, never decoded values.
    fn on_write_complete(&self, master_error: i32, client_handles: &[u32], statuses: &[i32]) {
        let _ = (master_error, client_handles, statuses);
    }

    /// A cancel completion arrived.
    fn on_cancel_complete(&self) {}

    /// Asks the request to cancel cooperatively. The underlying remote
    /// operation is not forcibly terminated; the request must eventually
    /// clear its slot (typically via a cancel-complete callback).
    fn cancel(&self);
}

/// The inbound callback interface invoked by the transport.
///
/// Handlers run on arbitrary transport threads and must never panic
/// outward; there is no safe caller to propagate to.
pub trait DataChangeSink: Send + Sync {
    /// Subscribed or unsolicited data change. `txn_id` of
    /// [`TransactionId::UNSOLICITED`] marks a subscription push with no
    /// correlated request.
    fn on_data_change(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_quality: i32,
        master_error: i32,
        items: ItemUpdateBatch,
    );

    /// Completion of an asynchronous read.
    fn on_read_complete(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_quality: i32,
        master_error: i32,
        items: ItemUpdateBatch,
    );

    /// Completion of an asynchronous write; statuses only.
    fn on_write_complete(
        &self,
        txn_id: TransactionId,
        group_handle: u32,
        master_error: i32,
        client_handles: &[u32],
        statuses: &[i32],
    );

    /// Completion of a cancellation.
    fn on_cancel_complete(&self, txn_id: TransactionId, group_handle: u32);
}
