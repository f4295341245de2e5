use time::Date;

use thiserror::Error;

use crate::models::{
    Account, Bill, Invoice, JournalEntry, NewTemplate, Payment, RecurringTemplate, TemplateId,
    TemplateUpdate,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("template not found: {0}")]
    TemplateNotFound(TemplateId),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("duplicate reference number: {0}")]
    DuplicateReference(String),
    #[error("no active transaction")]
    NoActiveTransaction,
}

pub type TransactionId = u64;

/// Persistence seam for the scheduler and poster. Backends must make a
/// `begin`/`commit` window atomic: either every write inside it lands or
/// none do (no header-without-lines states). Transactions are exclusive:
/// `begin_transaction` blocks until the active transaction completes, so
/// a rollback can never undo another caller's writes.
pub trait StorageBackend: Send + Sync {
    // Chart of accounts (read-mostly)
    fn create_account(&self, account: &Account) -> Result<(), StorageError>;
    fn account_exists(&self, account_id: &str) -> Result<bool, StorageError>;
    fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;

    // Recurring templates
    fn insert_template(&self, template: &NewTemplate) -> Result<TemplateId, StorageError>;
    fn get_template(&self, id: TemplateId) -> Result<Option<RecurringTemplate>, StorageError>;
    fn list_templates(&self) -> Result<Vec<RecurringTemplate>, StorageError>;
    fn update_template(&self, id: TemplateId, patch: &TemplateUpdate) -> Result<bool, StorageError>;
    fn delete_template(&self, id: TemplateId) -> Result<bool, StorageError>;
    /// Active templates whose `next_run_date` has arrived and whose end date
    /// has not passed, ordered by `next_run_date` then id.
    fn due_templates(&self, as_of: Date) -> Result<Vec<RecurringTemplate>, StorageError>;
    /// Atomically claims a due template: under the backend's own write lock
    /// (or in a single conditional statement), compares `next_run_date` to
    /// `expected_next_run` and advances the schedule only on a match.
    /// Returns `false` when another run already claimed it, the template is
    /// inactive, or it no longer exists — the caller must then skip posting.
    fn claim_template(
        &self,
        id: TemplateId,
        expected_next_run: Date,
        last_run: Date,
        next_run: Date,
    ) -> Result<bool, StorageError>;

    // Posted documents
    fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<(), StorageError>;
    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StorageError>;
    fn insert_bill(&self, bill: &Bill) -> Result<(), StorageError>;
    fn insert_payment(&self, payment: &Payment) -> Result<(), StorageError>;
    fn journal_entries(&self) -> Result<Vec<JournalEntry>, StorageError>;
    fn invoices(&self) -> Result<Vec<Invoice>, StorageError>;
    fn bills(&self) -> Result<Vec<Bill>, StorageError>;
    fn payments(&self) -> Result<Vec<Payment>, StorageError>;

    /// Strictly monotonic counter per scope (e.g. `JE-2025`). Replaces the
    /// racy count-rows-plus-one reference numbering.
    fn next_sequence(&self, scope: &str) -> Result<u64, StorageError>;

    fn begin_transaction(&self) -> Result<TransactionId, StorageError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
}
