use types::base::WorkerAddress;
use types::object::ObjectId;

/// Durability seam: watches a remote object and re-executes its creating
/// task if the object turns out to be lost.
///
/// Both methods are idempotent and must not call back into the dependency
/// manager synchronously.
pub trait ReconstructionPolicy: Send + Sync {
    /// Start watching `object_id`, reconstructing it if it is lost.
    fn listen_and_maybe_reconstruct(&self, object_id: ObjectId, owner_address: &WorkerAddress);

    /// Stop watching `object_id`. No-op if it is not being watched.
    fn cancel(&self, object_id: ObjectId);
}
