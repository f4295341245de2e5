use std::sync::Arc;

use rust_decimal_macros::dec;
use time::macros::date;

use recurd::audit::TracingAuditLog;
use recurd::scheduler::Scheduler;
use recurd_core::models::{
    Account, AccountType, BillStatus, BillTemplate, Counterparty, EntryLine, EntryStatus,
    Frequency, InvoiceStatus, InvoiceTemplate, ItemLine, JournalTemplate, NewTemplate,
    PaymentMethod, PaymentTemplate, TemplateData,
};
use recurd_core::StorageBackend;
use recurd_memory::InMemoryStorage;
use recurd_sqlite::SqliteStorage;

fn memory_backend() -> Arc<dyn StorageBackend> {
    Arc::new(InMemoryStorage::new())
}

fn sqlite_backend() -> Arc<dyn StorageBackend> {
    Arc::new(SqliteStorage::new(":memory:").unwrap())
}

fn seed_accounts(storage: &Arc<dyn StorageBackend>, ids: &[&str]) {
    for id in ids {
        storage
            .create_account(&Account {
                id: id.to_string(),
                name: id.to_string(),
                account_type: AccountType::Expense,
            })
            .unwrap();
    }
}

fn scheduler(storage: &Arc<dyn StorageBackend>) -> Scheduler {
    Scheduler::new(storage.clone(), Arc::new(TracingAuditLog))
}

fn base_template(name: &str, data: TemplateData) -> NewTemplate {
    NewTemplate {
        name: name.to_string(),
        description: None,
        frequency: Frequency::Monthly,
        frequency_value: 1,
        start_date: date!(2025 - 01 - 01),
        end_date: None,
        next_run_date: date!(2025 - 02 - 01),
        is_active: true,
        data,
        created_by: Some("tester".to_string()),
    }
}

fn rent_journal() -> TemplateData {
    TemplateData::JournalEntry(JournalTemplate {
        debits: vec![EntryLine {
            account_id: "rent_expense".to_string(),
            amount: dec!(1000.00),
            description: Some("office rent".to_string()),
        }],
        credits: vec![EntryLine {
            account_id: "bank".to_string(),
            amount: dec!(1000.00),
            description: None,
        }],
    })
}

fn run_journal_fire(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["rent_expense", "bank"]);
    let id = storage
        .insert_template(&base_template("Office rent", rent_journal()))
        .unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert!(summary.errors.is_empty());

    let entries = storage.journal_entries().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.entry_number, "JE-2025-0001");
    assert_eq!(entry.total_debit, entry.total_credit);
    assert_eq!(entry.status, EntryStatus::Posted);
    assert_eq!(entry.lines.len(), 2);

    let template = storage.get_template(id).unwrap().unwrap();
    assert_eq!(template.last_run_date, Some(date!(2025 - 03 - 15)));
    assert_eq!(template.next_run_date, date!(2025 - 04 - 01));
}

#[test]
fn journal_fire_memory() {
    run_journal_fire(memory_backend());
}

#[test]
fn journal_fire_sqlite() {
    run_journal_fire(sqlite_backend());
}

fn run_invoice_totals(storage: Arc<dyn StorageBackend>) {
    let data = TemplateData::Invoice(InvoiceTemplate {
        customer_id: 42,
        subtotal: dec!(1000.00),
        tax_rate: dec!(12),
        due_date: None,
        items: vec![ItemLine {
            description: "Hosting".to_string(),
            quantity: dec!(4),
            unit_price: dec!(250.00),
            account_id: None,
        }],
    });
    storage
        .insert_template(&base_template("Monthly hosting", data))
        .unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();
    assert_eq!(summary.processed, 1);

    let invoices = storage.invoices().unwrap();
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice.invoice_number, "INV-2025-0001");
    assert_eq!(invoice.tax_amount, dec!(120.00));
    assert_eq!(invoice.total_amount, dec!(1120.00));
    assert_eq!(invoice.balance, dec!(1120.00));
    assert_eq!(invoice.due_date, date!(2025 - 04 - 14));
    assert_eq!(invoice.status, InvoiceStatus::Sent);
    assert_eq!(invoice.items[0].line_total, dec!(1000.00));
}

#[test]
fn invoice_totals_memory() {
    run_invoice_totals(memory_backend());
}

#[test]
fn invoice_totals_sqlite() {
    run_invoice_totals(sqlite_backend());
}

fn run_bill_catch_up(storage: Arc<dyn StorageBackend>) {
    let data = TemplateData::Bill(BillTemplate {
        vendor_id: 7,
        subtotal: dec!(500.00),
        tax_rate: dec!(5),
        due_date: None,
        items: vec![],
    });
    let id = storage
        .insert_template(&base_template("Office lease", data))
        .unwrap();

    // Two periods behind: fires once and reschedules past the run date.
    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();
    assert_eq!(summary.processed, 1);

    let bills = storage.bills().unwrap();
    assert_eq!(bills.len(), 1);
    assert_eq!(bills[0].bill_number, "BILL-2025-0001");
    assert_eq!(bills[0].total_amount, dec!(525.00));
    assert_eq!(bills[0].status, BillStatus::Approved);

    let template = storage.get_template(id).unwrap().unwrap();
    assert_eq!(template.next_run_date, date!(2025 - 04 - 01));
}

#[test]
fn bill_catch_up_memory() {
    run_bill_catch_up(memory_backend());
}

#[test]
fn bill_catch_up_sqlite() {
    run_bill_catch_up(sqlite_backend());
}

fn run_payment_defaults(storage: Arc<dyn StorageBackend>) {
    let data = TemplateData::Payment(PaymentTemplate {
        vendor_id: Some(7),
        customer_id: None,
        amount: dec!(250.00),
        payment_method: None,
        reference: Some("lease #12".to_string()),
    });
    storage
        .insert_template(&base_template("Lease payment", data))
        .unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();
    assert_eq!(summary.processed, 1);

    let payments = storage.payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].payment_number, "PAY-2025-0001");
    assert_eq!(payments[0].method, PaymentMethod::BankTransfer);
    assert_eq!(payments[0].counterparty, Counterparty::Vendor(7));
    assert_eq!(payments[0].reference.as_deref(), Some("lease #12"));
}

#[test]
fn payment_defaults_memory() {
    run_payment_defaults(memory_backend());
}

#[test]
fn payment_defaults_sqlite() {
    run_payment_defaults(sqlite_backend());
}

fn run_partial_failure(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["rent_expense", "bank"]);
    storage
        .insert_template(&base_template("First rent", rent_journal()))
        .unwrap();
    let broken_id = storage
        .insert_template(&base_template(
            "Broken payment",
            TemplateData::Payment(PaymentTemplate {
                vendor_id: None,
                customer_id: None,
                amount: dec!(10.00),
                payment_method: None,
                reference: None,
            }),
        ))
        .unwrap();
    storage
        .insert_template(&base_template("Second rent", rent_journal()))
        .unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].template_id, broken_id);
    assert_eq!(storage.journal_entries().unwrap().len(), 2);
    assert!(storage.payments().unwrap().is_empty());

    // The failed template keeps its schedule for the next run.
    let broken = storage.get_template(broken_id).unwrap().unwrap();
    assert_eq!(broken.next_run_date, date!(2025 - 02 - 01));
    assert_eq!(broken.last_run_date, None);
}

#[test]
fn partial_failure_memory() {
    run_partial_failure(memory_backend());
}

#[test]
fn partial_failure_sqlite() {
    run_partial_failure(sqlite_backend());
}

fn run_double_process(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["rent_expense", "bank"]);
    storage
        .insert_template(&base_template("Office rent", rent_journal()))
        .unwrap();
    let scheduler = scheduler(&storage);

    let first = scheduler.process_due(date!(2025 - 03 - 15), "cron").unwrap();
    let second = scheduler.process_due(date!(2025 - 03 - 15), "cron").unwrap();

    assert_eq!(first.processed, 1);
    assert_eq!(second.processed, 0);
    assert!(second.errors.is_empty());
    assert_eq!(storage.journal_entries().unwrap().len(), 1);
}

#[test]
fn double_process_memory() {
    run_double_process(memory_backend());
}

#[test]
fn double_process_sqlite() {
    run_double_process(sqlite_backend());
}

fn run_overlapping_runs(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["rent_expense", "bank"]);
    storage
        .insert_template(&base_template("Office rent", rent_journal()))
        .unwrap();
    let scheduler = Arc::new(scheduler(&storage));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || {
                scheduler.process_due(date!(2025 - 03 - 15), "cron").unwrap()
            })
        })
        .collect();

    let mut total_processed = 0;
    for handle in handles {
        let summary = handle.join().unwrap();
        assert!(summary.errors.is_empty());
        total_processed += summary.processed;
    }

    assert_eq!(total_processed, 1);
    let entries = storage.journal_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_number, "JE-2025-0001");
}

#[test]
fn overlapping_runs_memory() {
    run_overlapping_runs(memory_backend());
}

#[test]
fn overlapping_runs_sqlite() {
    run_overlapping_runs(sqlite_backend());
}

fn run_unbalanced_rollback(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["rent_expense", "bank"]);
    let data = TemplateData::JournalEntry(JournalTemplate {
        debits: vec![EntryLine {
            account_id: "rent_expense".to_string(),
            amount: dec!(1000.00),
            description: None,
        }],
        credits: vec![EntryLine {
            account_id: "bank".to_string(),
            amount: dec!(999.99),
            description: None,
        }],
    });
    let id = storage
        .insert_template(&base_template("Lopsided", data))
        .unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].message.contains("out of balance"));
    assert!(storage.journal_entries().unwrap().is_empty());

    let template = storage.get_template(id).unwrap().unwrap();
    assert_eq!(template.next_run_date, date!(2025 - 02 - 01));
}

#[test]
fn unbalanced_rollback_memory() {
    run_unbalanced_rollback(memory_backend());
}

#[test]
fn unbalanced_rollback_sqlite() {
    run_unbalanced_rollback(sqlite_backend());
}

fn run_unknown_account(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["bank"]);
    storage
        .insert_template(&base_template("Office rent", rent_journal()))
        .unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].message.contains("unknown account"));
    assert!(storage.journal_entries().unwrap().is_empty());
}

#[test]
fn unknown_account_memory() {
    run_unknown_account(memory_backend());
}

#[test]
fn unknown_account_sqlite() {
    run_unknown_account(sqlite_backend());
}

fn run_inactive_and_expired_never_fire(storage: Arc<dyn StorageBackend>) {
    seed_accounts(&storage, &["rent_expense", "bank"]);
    let mut inactive = base_template("Paused rent", rent_journal());
    inactive.is_active = false;
    storage.insert_template(&inactive).unwrap();

    let mut expired = base_template("Ended rent", rent_journal());
    expired.end_date = Some(date!(2025 - 02 - 28));
    storage.insert_template(&expired).unwrap();

    let summary = scheduler(&storage)
        .process_due(date!(2025 - 03 - 15), "cron")
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert!(summary.errors.is_empty());
    assert!(storage.journal_entries().unwrap().is_empty());
}

#[test]
fn inactive_and_expired_never_fire_memory() {
    run_inactive_and_expired_never_fire(memory_backend());
}

#[test]
fn inactive_and_expired_never_fire_sqlite() {
    run_inactive_and_expired_never_fire(sqlite_backend());
}
