//! Object identity. Objects are immutable and named: an id fixes both the
//! task that produces the object and which of that task's outputs it is, so
//! the creator can always be recovered from the id alone.

use std::fmt;

use fastcrypto::encoding::{Base58, Encoding};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::base::{TaskId, WorkerAddress, TASK_ID_LENGTH};
use crate::error::NodeError;
use crate::serde::Readable;

/// Length of an object id in bytes: the creator task id followed by a
/// little-endian output index.
pub const OBJECT_ID_LENGTH: usize = TASK_ID_LENGTH + 8;

/// Identifier of an immutable object produced by a task.
#[serde_as]
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(#[serde_as(as = "Readable<Base58, Bytes>")] [u8; OBJECT_ID_LENGTH]);

impl ObjectId {
    pub const LENGTH: usize = OBJECT_ID_LENGTH;
    pub const ZERO: Self = Self([0; OBJECT_ID_LENGTH]);

    /// Id of `creator`'s output number `index`.
    pub fn new(creator: TaskId, index: u64) -> Self {
        let mut bytes = [0u8; OBJECT_ID_LENGTH];
        bytes[..TASK_ID_LENGTH].copy_from_slice(creator.inner());
        bytes[TASK_ID_LENGTH..].copy_from_slice(&index.to_le_bytes());
        Self(bytes)
    }

    /// The task that produces this object.
    pub fn creator_task_id(&self) -> TaskId {
        // OK to unwrap: the prefix width is fixed by construction.
        TaskId::new(self.0[..TASK_ID_LENGTH].try_into().unwrap())
    }

    /// Which of the creator's outputs this object is.
    pub fn index(&self) -> u64 {
        u64::from_le_bytes(self.0[TASK_ID_LENGTH..].try_into().unwrap())
    }

    pub fn random() -> Self {
        Self::new(TaskId::random(), rand::random())
    }

    /// Parse the id from a fixed-width binary buffer.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Self, NodeError> {
        <[u8; OBJECT_ID_LENGTH]>::try_from(bytes.as_ref())
            .map_err(|_| NodeError::InvalidIdLength {
                expected: OBJECT_ID_LENGTH,
                actual: bytes.as_ref().len(),
            })
            .map(Self)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub const fn inner(&self) -> &[u8; OBJECT_ID_LENGTH] {
        &self.0
    }

    pub const fn into_inner(self) -> [u8; OBJECT_ID_LENGTH] {
        self.0
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Base58::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// Descriptor provided on subscription: an object some operation depends on,
/// plus the address of the worker authoritative for it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub object_id: ObjectId,
    pub owner_address: WorkerAddress,
}

impl ObjectReference {
    pub fn new(object_id: ObjectId, owner_address: WorkerAddress) -> Self {
        Self { object_id, owner_address }
    }
}
