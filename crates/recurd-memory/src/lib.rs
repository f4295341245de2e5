use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, Mutex, RwLock,
    },
};

use time::Date;

use recurd_core::models::{
    Account, Bill, Invoice, JournalEntry, NewTemplate, Payment, RecurringTemplate, TemplateId,
    TemplateUpdate,
};
use recurd_core::storage::{StorageBackend, StorageError, TransactionId};

#[derive(Clone)]
struct Store {
    accounts: BTreeMap<String, Account>,
    templates: BTreeMap<TemplateId, RecurringTemplate>,
    journal_entries: Vec<JournalEntry>,
    invoices: Vec<Invoice>,
    bills: Vec<Bill>,
    payments: Vec<Payment>,
    sequences: BTreeMap<String, u64>,
    next_template_id: TemplateId,
}

impl Store {
    fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
            templates: BTreeMap::new(),
            journal_entries: Vec::new(),
            invoices: Vec::new(),
            bills: Vec::new(),
            payments: Vec::new(),
            sequences: BTreeMap::new(),
            next_template_id: 1,
        }
    }
}

/// Storage backend holding everything in process memory. Transactions are
/// snapshot-based (`begin` clones the store, `rollback` restores the clone)
/// and exclusive: at most one is active at a time, and `begin` blocks until
/// the previous one commits or rolls back. A rollback therefore only ever
/// discards its own transaction's writes.
pub struct InMemoryStorage {
    store: RwLock<Store>,
    tx_counter: AtomicU64,
    active_tx: Mutex<Option<(TransactionId, Store)>>,
    tx_done: Condvar,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::new()),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(None),
            tx_done: Condvar::new(),
        }
    }
}

impl StorageBackend for InMemoryStorage {
    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut store = self.store.write().unwrap();
        store.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn account_exists(&self, account_id: &str) -> Result<bool, StorageError> {
        Ok(self.store.read().unwrap().accounts.contains_key(account_id))
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(self.store.read().unwrap().accounts.values().cloned().collect())
    }

    fn insert_template(&self, template: &NewTemplate) -> Result<TemplateId, StorageError> {
        let mut store = self.store.write().unwrap();
        let id = store.next_template_id;
        store.next_template_id += 1;
        store.templates.insert(
            id,
            RecurringTemplate {
                id,
                name: template.name.clone(),
                description: template.description.clone(),
                frequency: template.frequency,
                frequency_value: template.frequency_value,
                start_date: template.start_date,
                end_date: template.end_date,
                next_run_date: template.next_run_date,
                last_run_date: None,
                is_active: template.is_active,
                data: template.data.clone(),
                created_by: template.created_by.clone(),
            },
        );
        Ok(id)
    }

    fn get_template(&self, id: TemplateId) -> Result<Option<RecurringTemplate>, StorageError> {
        Ok(self.store.read().unwrap().templates.get(&id).cloned())
    }

    fn list_templates(&self) -> Result<Vec<RecurringTemplate>, StorageError> {
        Ok(self.store.read().unwrap().templates.values().cloned().collect())
    }

    fn update_template(
        &self,
        id: TemplateId,
        patch: &TemplateUpdate,
    ) -> Result<bool, StorageError> {
        let mut store = self.store.write().unwrap();
        match store.templates.get_mut(&id) {
            Some(template) => {
                patch.apply(template);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_template(&self, id: TemplateId) -> Result<bool, StorageError> {
        Ok(self.store.write().unwrap().templates.remove(&id).is_some())
    }

    fn due_templates(&self, as_of: Date) -> Result<Vec<RecurringTemplate>, StorageError> {
        let store = self.store.read().unwrap();
        let mut due: Vec<RecurringTemplate> = store
            .templates
            .values()
            .filter(|t| {
                t.is_active
                    && t.next_run_date <= as_of
                    && t.end_date.map_or(true, |end| end >= as_of)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_run_date, t.id));
        Ok(due)
    }

    fn claim_template(
        &self,
        id: TemplateId,
        expected_next_run: Date,
        last_run: Date,
        next_run: Date,
    ) -> Result<bool, StorageError> {
        let mut store = self.store.write().unwrap();
        match store.templates.get_mut(&id) {
            Some(template)
                if template.is_active && template.next_run_date == expected_next_run =>
            {
                template.last_run_date = Some(last_run);
                template.next_run_date = next_run;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<(), StorageError> {
        let mut store = self.store.write().unwrap();
        if store
            .journal_entries
            .iter()
            .any(|e| e.entry_number == entry.entry_number)
        {
            return Err(StorageError::DuplicateReference(entry.entry_number.clone()));
        }
        store.journal_entries.push(entry.clone());
        Ok(())
    }

    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StorageError> {
        let mut store = self.store.write().unwrap();
        if store
            .invoices
            .iter()
            .any(|i| i.invoice_number == invoice.invoice_number)
        {
            return Err(StorageError::DuplicateReference(invoice.invoice_number.clone()));
        }
        store.invoices.push(invoice.clone());
        Ok(())
    }

    fn insert_bill(&self, bill: &Bill) -> Result<(), StorageError> {
        let mut store = self.store.write().unwrap();
        if store.bills.iter().any(|b| b.bill_number == bill.bill_number) {
            return Err(StorageError::DuplicateReference(bill.bill_number.clone()));
        }
        store.bills.push(bill.clone());
        Ok(())
    }

    fn insert_payment(&self, payment: &Payment) -> Result<(), StorageError> {
        let mut store = self.store.write().unwrap();
        if store
            .payments
            .iter()
            .any(|p| p.payment_number == payment.payment_number)
        {
            return Err(StorageError::DuplicateReference(payment.payment_number.clone()));
        }
        store.payments.push(payment.clone());
        Ok(())
    }

    fn journal_entries(&self) -> Result<Vec<JournalEntry>, StorageError> {
        Ok(self.store.read().unwrap().journal_entries.clone())
    }

    fn invoices(&self) -> Result<Vec<Invoice>, StorageError> {
        Ok(self.store.read().unwrap().invoices.clone())
    }

    fn bills(&self) -> Result<Vec<Bill>, StorageError> {
        Ok(self.store.read().unwrap().bills.clone())
    }

    fn payments(&self) -> Result<Vec<Payment>, StorageError> {
        Ok(self.store.read().unwrap().payments.clone())
    }

    fn next_sequence(&self, scope: &str) -> Result<u64, StorageError> {
        let mut store = self.store.write().unwrap();
        let value = store.sequences.entry(scope.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut active = self.active_tx.lock().unwrap();
        while active.is_some() {
            active = self.tx_done.wait(active).unwrap();
        }
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.store.read().unwrap().clone();
        *active = Some((tx_id, snapshot));
        tracing::debug!(tx_id, "Transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx.lock().unwrap();
        match active.take() {
            Some((id, _)) if id == tx_id => {
                self.tx_done.notify_one();
                tracing::debug!(tx_id, "Transaction committed");
                Ok(())
            }
            other => {
                *active = other;
                Err(StorageError::NoActiveTransaction)
            }
        }
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx.lock().unwrap();
        match active.take() {
            Some((id, snapshot)) if id == tx_id => {
                *self.store.write().unwrap() = snapshot;
                self.tx_done.notify_one();
                tracing::debug!(tx_id, "Transaction rolled back");
                Ok(())
            }
            other => {
                *active = other;
                Err(StorageError::NoActiveTransaction)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recurd_core::models::{
        AccountType, EntryStatus, Frequency, JournalLine, JournalTemplate, TemplateData,
    };
    use rust_decimal_macros::dec;
    use time::macros::date;

    fn journal_template(name: &str, next_run: Date) -> NewTemplate {
        NewTemplate {
            name: name.to_string(),
            description: None,
            frequency: Frequency::Monthly,
            frequency_value: 1,
            start_date: date!(2025 - 01 - 01),
            end_date: None,
            next_run_date: next_run,
            is_active: true,
            data: TemplateData::JournalEntry(JournalTemplate::default()),
            created_by: None,
        }
    }

    #[test]
    fn template_crud_round_trip() {
        let storage = InMemoryStorage::new();
        let id = storage
            .insert_template(&journal_template("Rent", date!(2025 - 02 - 01)))
            .unwrap();

        let loaded = storage.get_template(id).unwrap().unwrap();
        assert_eq!(loaded.name, "Rent");
        assert_eq!(loaded.next_run_date, date!(2025 - 02 - 01));
        assert!(loaded.last_run_date.is_none());

        let updated = storage
            .update_template(
                id,
                &TemplateUpdate {
                    name: Some("Office rent".to_string()),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);
        let loaded = storage.get_template(id).unwrap().unwrap();
        assert_eq!(loaded.name, "Office rent");
        assert!(!loaded.is_active);

        assert!(storage.delete_template(id).unwrap());
        assert!(storage.get_template(id).unwrap().is_none());
    }

    #[test]
    fn due_templates_filters_and_orders() {
        let storage = InMemoryStorage::new();
        let late = storage
            .insert_template(&journal_template("Late", date!(2025 - 03 - 10)))
            .unwrap();
        let early = storage
            .insert_template(&journal_template("Early", date!(2025 - 02 - 01)))
            .unwrap();

        let mut inactive = journal_template("Inactive", date!(2025 - 01 - 01));
        inactive.is_active = false;
        storage.insert_template(&inactive).unwrap();

        let mut expired = journal_template("Expired", date!(2025 - 01 - 01));
        expired.end_date = Some(date!(2025 - 02 - 28));
        storage.insert_template(&expired).unwrap();

        let future = journal_template("Future", date!(2025 - 04 - 01));
        storage.insert_template(&future).unwrap();

        let due = storage.due_templates(date!(2025 - 03 - 15)).unwrap();
        let ids: Vec<TemplateId> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn sequences_are_scoped_and_monotonic() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.next_sequence("JE-2025").unwrap(), 1);
        assert_eq!(storage.next_sequence("JE-2025").unwrap(), 2);
        assert_eq!(storage.next_sequence("INV-2025").unwrap(), 1);
        assert_eq!(storage.next_sequence("JE-2026").unwrap(), 1);
    }

    #[test]
    fn duplicate_entry_number_is_rejected() {
        let storage = InMemoryStorage::new();
        let entry = JournalEntry {
            entry_number: "JE-2025-0001".to_string(),
            entry_date: date!(2025 - 03 - 01),
            description: "Rent".to_string(),
            total_debit: dec!(100),
            total_credit: dec!(100),
            status: EntryStatus::Posted,
            lines: vec![
                JournalLine {
                    account_id: "rent".to_string(),
                    debit: dec!(100),
                    credit: dec!(0),
                    memo: None,
                },
                JournalLine {
                    account_id: "bank".to_string(),
                    debit: dec!(0),
                    credit: dec!(100),
                    memo: None,
                },
            ],
        };
        storage.insert_journal_entry(&entry).unwrap();
        let err = storage.insert_journal_entry(&entry).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateReference(_)));
    }

    #[test]
    fn claim_requires_matching_next_run() {
        let storage = InMemoryStorage::new();
        let id = storage
            .insert_template(&journal_template("Rent", date!(2025 - 02 - 01)))
            .unwrap();

        let claimed = storage
            .claim_template(id, date!(2025 - 02 - 01), date!(2025 - 03 - 15), date!(2025 - 04 - 01))
            .unwrap();
        assert!(claimed);

        let template = storage.get_template(id).unwrap().unwrap();
        assert_eq!(template.last_run_date, Some(date!(2025 - 03 - 15)));
        assert_eq!(template.next_run_date, date!(2025 - 04 - 01));

        // A second claim against the stale date loses.
        let reclaimed = storage
            .claim_template(id, date!(2025 - 02 - 01), date!(2025 - 03 - 15), date!(2025 - 04 - 01))
            .unwrap();
        assert!(!reclaimed);

        storage
            .update_template(
                id,
                &TemplateUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        let inactive = storage
            .claim_template(id, date!(2025 - 04 - 01), date!(2025 - 04 - 01), date!(2025 - 05 - 01))
            .unwrap();
        assert!(!inactive);
    }

    #[test]
    fn transactions_are_exclusive() {
        use std::sync::Arc;
        use std::time::Duration;

        let storage = Arc::new(InMemoryStorage::new());
        let tx = storage.begin_transaction().unwrap();

        let contender = storage.clone();
        let handle = std::thread::spawn(move || {
            let tx2 = contender.begin_transaction().unwrap();
            contender
                .insert_template(&journal_template("Second", date!(2025 - 02 - 01)))
                .unwrap();
            contender.commit_transaction(tx2).unwrap();
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        storage
            .insert_template(&journal_template("First", date!(2025 - 02 - 01)))
            .unwrap();
        storage.rollback_transaction(tx).unwrap();
        handle.join().unwrap();

        // The rollback undid only its own write, not the second transaction's.
        let names: Vec<String> = storage
            .list_templates()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Second".to_string()]);
    }

    #[test]
    fn rollback_restores_snapshot() {
        let storage = InMemoryStorage::new();
        storage
            .create_account(&Account {
                id: "bank".to_string(),
                name: "Bank".to_string(),
                account_type: AccountType::Asset,
            })
            .unwrap();

        let tx = storage.begin_transaction().unwrap();
        let id = storage
            .insert_template(&journal_template("Rent", date!(2025 - 02 - 01)))
            .unwrap();
        storage.next_sequence("JE-2025").unwrap();
        storage.rollback_transaction(tx).unwrap();

        assert!(storage.get_template(id).unwrap().is_none());
        assert_eq!(storage.next_sequence("JE-2025").unwrap(), 1);
        assert!(storage.account_exists("bank").unwrap());
    }
}
