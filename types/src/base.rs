//! Identifiers shared across the node runtime: task and worker ids, and the
//! network address of the worker that owns an object.

use std::fmt;

use fastcrypto::encoding::{Base58, Encoding, Hex};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::error::NodeError;
use crate::serde::Readable;

/// Length of a task id in bytes.
pub const TASK_ID_LENGTH: usize = 24;

/// Length of a worker id, based on the length of an ed25519 public key.
pub const WORKER_ID_LENGTH: usize = 32;

/// Identifier of a single task execution.
#[serde_as]
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaskId(#[serde_as(as = "Readable<Base58, Bytes>")] [u8; TASK_ID_LENGTH]);

impl TaskId {
    pub const LENGTH: usize = TASK_ID_LENGTH;
    pub const ZERO: Self = Self([0; TASK_ID_LENGTH]);

    pub const fn new(bytes: [u8; TASK_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn generate<R: rand::RngCore + rand::CryptoRng>(mut rng: R) -> Self {
        let mut bytes = [0; TASK_ID_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn random() -> Self {
        Self::generate(rand::thread_rng())
    }

    pub const fn inner(&self) -> &[u8; TASK_ID_LENGTH] {
        &self.0
    }

    pub const fn into_inner(self) -> [u8; TASK_ID_LENGTH] {
        self.0
    }

    /// Parse the id from a fixed-width binary buffer.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Self, NodeError> {
        <[u8; TASK_ID_LENGTH]>::try_from(bytes.as_ref())
            .map_err(|_| NodeError::InvalidIdLength {
                expected: TASK_ID_LENGTH,
                actual: bytes.as_ref().len(),
            })
            .map(Self)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for TaskId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; TASK_ID_LENGTH]> for TaskId {
    fn from(bytes: [u8; TASK_ID_LENGTH]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Base58::encode(self.0))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({self})")
    }
}

/// Identifier of a worker process.
#[serde_as]
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WorkerId(#[serde_as(as = "Readable<Hex, Bytes>")] pub [u8; WORKER_ID_LENGTH]);

impl WorkerId {
    pub const LENGTH: usize = WORKER_ID_LENGTH;
    pub const ZERO: Self = Self([0; WORKER_ID_LENGTH]);

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; WORKER_ID_LENGTH];
        rand::RngCore::fill_bytes(&mut rng, &mut bytes[..]);
        Self(bytes)
    }

    pub fn short_display(&self, len: u8) -> impl fmt::Display + '_ {
        ShortWorkerId(self, len)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = f.precision().unwrap_or(WORKER_ID_LENGTH);
        for byte in self.0.iter().take(len) {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({self})")
    }
}

struct ShortWorkerId<'a>(&'a WorkerId, u8);

impl fmt::Display for ShortWorkerId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.0, self.1 as usize)
    }
}

/// Network location of the worker that owns an object and is authoritative
/// for it. The default value is the unknown address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub ip_address: String,
    pub port: u16,
    pub worker_id: WorkerId,
}

impl WorkerAddress {
    pub fn new(ip_address: impl Into<String>, port: u16, worker_id: WorkerId) -> Self {
        Self { ip_address: ip_address.into(), port, worker_id }
    }

    /// Whether the address names a concrete worker, as opposed to being
    /// unknown or anonymous.
    pub fn has_worker_id(&self) -> bool {
        self.worker_id != WorkerId::ZERO
    }
}
