use thiserror::Error;

use crate::object::ObjectId;

pub type NodeResult<T = ()> = Result<T, NodeError>;

/// Error space of the node-local runtime components.
#[derive(Eq, PartialEq, Clone, Debug, Error)]
pub enum NodeError {
    #[error("Invalid id length: expected {expected} bytes, got {actual}")]
    InvalidIdLength { expected: usize, actual: usize },

    #[error("Failed to pull object {object_id}: {reason}")]
    ObjectPullFailed { object_id: ObjectId, reason: String },
}
