//! In-memory ledger
//!
//! The ledger has a single write lease. `begin` takes it and holds it until
//! the transaction is committed or rolled back; calls made outside a
//! transaction take it for their own duration. Writes under a transaction
//! apply in place and leave an undo entry in that transaction's journal,
//! which rollback replays in reverse. Nobody else can observe or build on
//! those writes before the transaction is finalized.

use crate::models::ledger::{
    Client, ClientStatus, Loan, LoanStatus, LoanTransaction, LoanTransactionType,
};
use crate::storage::{StorageError, StorageResult, TransactionId, UnitOfWork};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Balances at or below this are treated as fully repaid
const BALANCE_EPSILON: f64 = 1e-9;

/// Previous state of one record, restored on rollback
#[derive(Debug, Clone)]
enum UndoEntry {
    Client { id: u64, previous: Option<Client> },
    Loan { id: u64, previous: Option<Loan> },
}

/// Undo entries of an open transaction, plus the write lease it holds
#[derive(Debug)]
struct Journal {
    entries: Vec<UndoEntry>,
    _lease: OwnedSemaphorePermit,
}

#[derive(Debug, Default)]
struct LedgerState {
    clients: BTreeMap<u64, Client>,
    loans: BTreeMap<u64, Loan>,
    journals: HashMap<TransactionId, Journal>,
    last_client_id: u64,
    last_loan_id: u64,
    last_transaction_id: u64,
}

impl LedgerState {
    fn ensure_open(&self, tx: Option<TransactionId>) -> StorageResult<()> {
        match tx {
            Some(tx) if !self.journals.contains_key(&tx) => Err(StorageError::UnknownTransaction(tx)),
            _ => Ok(()),
        }
    }

    fn record(&mut self, tx: Option<TransactionId>, entry: UndoEntry) {
        if let Some(journal) = tx.and_then(|tx| self.journals.get_mut(&tx)) {
            journal.entries.push(entry);
        }
    }

    fn put_client(&mut self, tx: Option<TransactionId>, client: Client) -> Client {
        let previous = self.clients.insert(client.id, client.clone());
        self.record(tx, UndoEntry::Client { id: client.id, previous });
        client
    }

    fn put_loan(&mut self, tx: Option<TransactionId>, loan: Loan) -> Loan {
        let previous = self.loans.insert(loan.id, loan.clone());
        self.record(tx, UndoEntry::Loan { id: loan.id, previous });
        loan
    }

    fn client(&self, id: u64) -> StorageResult<&Client> {
        self.clients.get(&id).ok_or(StorageError::ClientNotFound(id))
    }

    fn loan(&self, id: u64) -> StorageResult<&Loan> {
        self.loans.get(&id).ok_or(StorageError::LoanNotFound(id))
    }

    fn undo(&mut self, entry: UndoEntry) {
        match entry {
            UndoEntry::Client { id, previous: Some(client) } => {
                self.clients.insert(id, client);
            }
            UndoEntry::Client { id, previous: None } => {
                self.clients.remove(&id);
            }
            UndoEntry::Loan { id, previous: Some(loan) } => {
                self.loans.insert(id, loan);
            }
            UndoEntry::Loan { id, previous: None } => {
                self.loans.remove(&id);
            }
        }
    }
}

/// New client fields
#[derive(Debug, Clone)]
pub struct NewClient {
    pub first_name: String,
    pub last_name: String,
    pub external_id: Option<String>,
    pub active: bool,
}

/// Access to the ledger state for one call
///
/// Autocommit calls hold the write lease until the guard is dropped; calls
/// under a transaction borrow the lease that transaction already holds.
struct Access<'a> {
    state: MutexGuard<'a, LedgerState>,
    _lease: Option<OwnedSemaphorePermit>,
}

/// Thread-safe in-memory ledger of clients and loans
#[derive(Debug)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    lease: Arc<Semaphore>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            lease: Arc::new(Semaphore::new(1)),
        }
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    async fn acquire_lease(&self) -> StorageResult<OwnedSemaphorePermit> {
        self.lease
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::InvalidState("Ledger is closed".to_string()))
    }

    /// Lock the state for a call made under `tx`, or under its own lease
    async fn access(&self, tx: Option<TransactionId>) -> StorageResult<Access<'_>> {
        let lease = match tx {
            Some(_) => None,
            None => Some(self.acquire_lease().await?),
        };
        let state = self.state.lock().await;
        state.ensure_open(tx)?;
        Ok(Access { state, _lease: lease })
    }

    pub async fn create_client(&self, tx: Option<TransactionId>, new: NewClient) -> StorageResult<Client> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        state.last_client_id += 1;
        let client = Client {
            id: state.last_client_id,
            first_name: new.first_name,
            last_name: new.last_name,
            external_id: new.external_id,
            status: if new.active { ClientStatus::Active } else { ClientStatus::Pending },
        };
        debug!("Creating client {}", client.id);
        Ok(state.put_client(tx, client))
    }

    pub async fn client(&self, tx: Option<TransactionId>, id: u64) -> StorageResult<Client> {
        self.access(tx).await?.state.client(id).cloned()
    }

    pub async fn clients(&self, tx: Option<TransactionId>) -> StorageResult<Vec<Client>> {
        Ok(self.access(tx).await?.state.clients.values().cloned().collect())
    }

    pub async fn update_client(
        &self,
        tx: Option<TransactionId>,
        id: u64,
        first_name: Option<String>,
        last_name: Option<String>,
        external_id: Option<String>,
    ) -> StorageResult<Client> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        let mut client = state.client(id)?.clone();
        if let Some(first_name) = first_name {
            client.first_name = first_name;
        }
        if let Some(last_name) = last_name {
            client.last_name = last_name;
        }
        if external_id.is_some() {
            client.external_id = external_id;
        }
        Ok(state.put_client(tx, client))
    }

    pub async fn activate_client(&self, tx: Option<TransactionId>, id: u64) -> StorageResult<Client> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        let mut client = state.client(id)?.clone();
        if client.status == ClientStatus::Active {
            return Err(StorageError::InvalidState(format!("Client {} is already active", id)));
        }
        client.status = ClientStatus::Active;
        Ok(state.put_client(tx, client))
    }

    pub async fn delete_client(&self, tx: Option<TransactionId>, id: u64) -> StorageResult<Client> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        let client = state.client(id)?.clone();
        if state.loans.values().any(|loan| loan.client_id == id) {
            return Err(StorageError::InvalidState(format!(
                "Client {} cannot be deleted while it has loans",
                id
            )));
        }
        state.clients.remove(&id);
        state.record(tx, UndoEntry::Client { id, previous: Some(client.clone()) });
        Ok(client)
    }

    pub async fn create_loan(&self, tx: Option<TransactionId>, client_id: u64, principal: f64) -> StorageResult<Loan> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        state.client(client_id)?;
        state.last_loan_id += 1;
        let loan = Loan {
            id: state.last_loan_id,
            client_id,
            principal,
            outstanding: principal,
            status: LoanStatus::SubmittedAndPendingApproval,
            transactions: Vec::new(),
        };
        debug!("Creating loan {} for client {}", loan.id, client_id);
        Ok(state.put_loan(tx, loan))
    }

    pub async fn loan(&self, tx: Option<TransactionId>, id: u64) -> StorageResult<Loan> {
        self.access(tx).await?.state.loan(id).cloned()
    }

    pub async fn approve_loan(&self, tx: Option<TransactionId>, id: u64) -> StorageResult<Loan> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        let mut loan = state.loan(id)?.clone();
        if loan.status != LoanStatus::SubmittedAndPendingApproval {
            return Err(StorageError::InvalidState(format!("Loan {} is not pending approval", id)));
        }
        loan.status = LoanStatus::Approved;
        Ok(state.put_loan(tx, loan))
    }

    pub async fn disburse_loan(&self, tx: Option<TransactionId>, id: u64) -> StorageResult<Loan> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        let mut loan = state.loan(id)?.clone();
        if loan.status != LoanStatus::Approved {
            return Err(StorageError::InvalidState(format!("Loan {} must be approved before disbursal", id)));
        }
        state.last_transaction_id += 1;
        loan.status = LoanStatus::Active;
        loan.transactions.push(LoanTransaction {
            id: state.last_transaction_id,
            transaction_type: LoanTransactionType::Disbursement,
            amount: loan.principal,
            outstanding_after: loan.outstanding,
        });
        Ok(state.put_loan(tx, loan))
    }

    /// Record a repayment, returning the updated loan and the new transaction id
    pub async fn repay_loan(&self, tx: Option<TransactionId>, id: u64, amount: f64) -> StorageResult<(Loan, u64)> {
        let mut access = self.access(tx).await?;
        let state = &mut *access.state;
        let mut loan = state.loan(id)?.clone();
        if loan.status != LoanStatus::Active {
            return Err(StorageError::InvalidState(format!("Loan {} is not active", id)));
        }
        if amount > loan.outstanding + BALANCE_EPSILON {
            return Err(StorageError::InvalidState(format!(
                "Repayment of {} exceeds outstanding balance {} on loan {}",
                amount, loan.outstanding, id
            )));
        }
        state.last_transaction_id += 1;
        let transaction_id = state.last_transaction_id;
        loan.outstanding -= amount;
        if loan.outstanding <= BALANCE_EPSILON {
            loan.outstanding = 0.0;
            loan.status = LoanStatus::ClosedObligationsMet;
        }
        loan.transactions.push(LoanTransaction {
            id: transaction_id,
            transaction_type: LoanTransactionType::Repayment,
            amount,
            outstanding_after: loan.outstanding,
        });
        let loan = state.put_loan(tx, loan);
        Ok((loan, transaction_id))
    }

    /// Number of transactions begun but not yet finalized
    pub async fn open_transactions(&self) -> usize {
        self.state.lock().await.journals.len()
    }
}

#[async_trait]
impl UnitOfWork for MemoryLedger {
    /// Waits for the write lease, which the transaction keeps until finalized
    async fn begin(&self) -> StorageResult<TransactionId> {
        let lease = self.acquire_lease().await?;
        let tx = TransactionId::new();
        self.state.lock().await.journals.insert(
            tx,
            Journal {
                entries: Vec::new(),
                _lease: lease,
            },
        );
        debug!("Began {}", tx);
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionId) -> StorageResult<()> {
        let journal = self
            .state
            .lock()
            .await
            .journals
            .remove(&tx)
            .ok_or(StorageError::UnknownTransaction(tx))?;
        debug!("Committed {} ({} writes)", tx, journal.entries.len());
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let journal = state
            .journals
            .remove(&tx)
            .ok_or(StorageError::UnknownTransaction(tx))?;
        let undone = journal.entries.len();
        for entry in journal.entries.into_iter().rev() {
            state.undo(entry);
        }
        info!("Rolled back {} ({} writes undone)", tx, undone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn new_client(name: &str) -> NewClient {
        NewClient {
            first_name: name.to_string(),
            last_name: "Lovelace".to_string(),
            external_id: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_autocommit_write_is_visible() {
        let ledger = MemoryLedger::new();
        let client = ledger.create_client(None, new_client("Ada")).await.unwrap();
        assert_eq!(ledger.client(None, client.id).await.unwrap().first_name, "Ada");
    }

    #[tokio::test]
    async fn test_rollback_undoes_in_reverse() {
        let ledger = MemoryLedger::new();
        let existing = ledger.create_client(None, new_client("Ada")).await.unwrap();

        let tx = ledger.begin().await.unwrap();
        let created = ledger.create_client(Some(tx), new_client("Grace")).await.unwrap();
        ledger
            .update_client(Some(tx), existing.id, Some("Augusta".to_string()), None, None)
            .await
            .unwrap();
        ledger.update_client(Some(tx), existing.id, Some("Countess".to_string()), None, None).await.unwrap();
        ledger.rollback(tx).await.unwrap();

        assert!(matches!(ledger.client(None, created.id).await, Err(StorageError::ClientNotFound(_))));
        assert_eq!(ledger.client(None, existing.id).await.unwrap().first_name, "Ada");
        assert_eq!(ledger.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_commit_keeps_writes() {
        let ledger = MemoryLedger::new();
        let tx = ledger.begin().await.unwrap();
        let client = ledger.create_client(Some(tx), new_client("Ada")).await.unwrap();
        ledger.commit(tx).await.unwrap();

        assert!(ledger.client(None, client.id).await.is_ok());
        assert!(matches!(ledger.rollback(tx).await, Err(StorageError::UnknownTransaction(_))));
    }

    #[tokio::test]
    async fn test_write_under_unknown_transaction() {
        let ledger = MemoryLedger::new();
        let result = ledger.create_client(Some(TransactionId::new()), new_client("Ada")).await;
        assert!(matches!(result, Err(StorageError::UnknownTransaction(_))));
        assert!(ledger.clients(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loan_lifecycle() {
        let ledger = MemoryLedger::new();
        let client = ledger.create_client(None, new_client("Ada")).await.unwrap();
        let loan = ledger.create_loan(None, client.id, 100.0).await.unwrap();

        assert!(ledger.disburse_loan(None, loan.id).await.is_err());
        ledger.approve_loan(None, loan.id).await.unwrap();
        ledger.disburse_loan(None, loan.id).await.unwrap();

        let (loan, _) = ledger.repay_loan(None, loan.id, 40.0).await.unwrap();
        assert_eq!(loan.outstanding, 60.0);
        assert!(ledger.repay_loan(None, loan.id, 61.0).await.is_err());

        let (loan, _) = ledger.repay_loan(None, loan.id, 60.0).await.unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedObligationsMet);
        assert_eq!(loan.transactions.len(), 3);
    }

    #[tokio::test]
    async fn test_loan_requires_client() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.create_loan(None, 99, 100.0).await.unwrap_err(),
            StorageError::ClientNotFound(99)
        );
    }

    #[tokio::test]
    async fn test_delete_client_with_loans_rejected() {
        let ledger = MemoryLedger::new();
        let client = ledger.create_client(None, new_client("Ada")).await.unwrap();
        ledger.create_loan(None, client.id, 10.0).await.unwrap();
        assert!(matches!(
            ledger.delete_client(None, client.id).await,
            Err(StorageError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_repayments_close_loan_despite_rounding() {
        let ledger = MemoryLedger::new();
        let client = ledger.create_client(None, new_client("Ada")).await.unwrap();
        let loan = ledger.create_loan(None, client.id, 0.3).await.unwrap();
        ledger.approve_loan(None, loan.id).await.unwrap();
        ledger.disburse_loan(None, loan.id).await.unwrap();

        ledger.repay_loan(None, loan.id, 0.1).await.unwrap();
        let (loan, _) = ledger.repay_loan(None, loan.id, 0.2).await.unwrap();
        assert_eq!(loan.status, LoanStatus::ClosedObligationsMet);
        assert_eq!(loan.outstanding, 0.0);
    }

    #[tokio::test]
    async fn test_autocommit_call_waits_for_open_transaction() {
        let ledger = MemoryLedger::new();
        let tx = ledger.begin().await.unwrap();
        let client = ledger.create_client(Some(tx), new_client("Ada")).await.unwrap();

        // Neither a read nor a write outside the transaction gets through
        let read = tokio::time::timeout(Duration::from_millis(20), ledger.client(None, client.id)).await;
        assert!(read.is_err());
        let write = tokio::time::timeout(Duration::from_millis(20), ledger.create_loan(None, client.id, 10.0)).await;
        assert!(write.is_err());

        // Reads under the transaction itself see its writes
        assert_eq!(ledger.client(Some(tx), client.id).await.unwrap().first_name, "Ada");

        ledger.rollback(tx).await.unwrap();
        assert_eq!(
            ledger.create_loan(None, client.id, 10.0).await.unwrap_err(),
            StorageError::ClientNotFound(client.id)
        );
        assert!(ledger.loan(None, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_keeps_write_queued_behind_transaction() {
        let ledger = MemoryLedger::new_shared();
        let client = ledger.create_client(None, new_client("Orig")).await.unwrap();

        let tx = ledger.begin().await.unwrap();
        ledger
            .update_client(Some(tx), client.id, Some("Uncommitted".to_string()), None, None)
            .await
            .unwrap();

        let writer = tokio::spawn({
            let ledger = ledger.clone();
            async move {
                ledger
                    .update_client(None, client.id, Some("Committed".to_string()), None, None)
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert!(!writer.is_finished());

        ledger.rollback(tx).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(ledger.client(None, client.id).await.unwrap().first_name, "Committed");
    }

    #[tokio::test]
    async fn test_second_transaction_waits_for_first() {
        let ledger = MemoryLedger::new();
        let first = ledger.begin().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(20), ledger.begin()).await.is_err());

        ledger.commit(first).await.unwrap();
        let second = ledger.begin().await.unwrap();
        ledger.rollback(second).await.unwrap();
        assert_eq!(ledger.open_transactions().await, 0);
    }
}
