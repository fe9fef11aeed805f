//! Storage module
//!
//! Defines the unit-of-work contract the batch coordinator relies on, and the
//! in-memory ledger backing the demonstration internal API

pub mod memory;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryLedger;

/// Handle of an open unit-of-work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0.simple())
    }
}

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Client with identifier {0} does not exist")]
    ClientNotFound(u64),

    #[error("Loan with identifier {0} does not exist")]
    LoanNotFound(u64),

    #[error("{0}")]
    InvalidState(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Begin/commit/rollback boundary spanning every handler of one batch
///
/// Implementations decide how effects are undone; callers only guarantee
/// that each begun transaction is finalized exactly once.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Open a new unit-of-work
    async fn begin(&self) -> StorageResult<TransactionId>;

    /// Make every effect recorded under `tx` permanent
    async fn commit(&self, tx: TransactionId) -> StorageResult<()>;

    /// Discard every effect recorded under `tx`
    async fn rollback(&self, tx: TransactionId) -> StorageResult<()>;
}
