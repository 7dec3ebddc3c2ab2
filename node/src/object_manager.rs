use types::base::WorkerAddress;
use types::error::NodeResult;
use types::object::ObjectId;

/// Transport seam for making remote objects local.
///
/// Implementations perform local acceptance only: an error return means the
/// request could not even be queued, and callers treat it as fatal. Actual
/// network failures are absorbed by the implementation's own retry path.
/// Both methods are idempotent, must be cheap and non-blocking, and must not
/// call back into the dependency manager synchronously.
pub trait ObjectManager: Send + Sync {
    /// Start fetching `object_id` from the node hosting `owner_address`.
    fn pull(&self, object_id: ObjectId, owner_address: &WorkerAddress) -> NodeResult;

    /// Cancel an in-flight fetch. No-op if none is outstanding.
    fn cancel_pull(&self, object_id: ObjectId);
}
