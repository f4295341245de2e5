use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, Mutex,
    },
};

use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use time::{Date, Month};

use recurd_core::models::{
    Account, AccountType, Bill, BillStatus, Counterparty, DocumentLine, EntryStatus, Frequency,
    Invoice, InvoiceStatus, JournalEntry, JournalLine, NewTemplate, Payment, PaymentMethod,
    RecurringTemplate, TemplateData, TemplateId, TemplateUpdate,
};
use recurd_core::storage::{StorageBackend, StorageError, TransactionId};

/// Transactions are savepoint-based and exclusive: `begin_transaction`
/// blocks until the active one commits or rolls back, so savepoints never
/// nest and a rollback only discards its own writes. Lock order is always
/// `active_tx` before `conn`.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tx_counter: AtomicU64,
    active_tx: Mutex<Option<TransactionId>>,
    tx_done: Condvar,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Other(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self {
            conn: Mutex::new(conn),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(None),
            tx_done: Condvar::new(),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                account_type TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recurring_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                frequency TEXT NOT NULL,
                frequency_value INTEGER NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT,
                next_run_date TEXT NOT NULL,
                last_run_date TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                template_data TEXT NOT NULL,
                created_by TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_templates_due
                ON recurring_templates(is_active, next_run_date);

            CREATE TABLE IF NOT EXISTS journal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_number TEXT NOT NULL UNIQUE,
                entry_date TEXT NOT NULL,
                description TEXT NOT NULL,
                total_debit TEXT NOT NULL,
                total_credit TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS journal_entry_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                journal_entry_id INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                debit TEXT NOT NULL,
                credit TEXT NOT NULL,
                memo TEXT,
                FOREIGN KEY (journal_entry_id) REFERENCES journal_entries(id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_number TEXT NOT NULL UNIQUE,
                customer_id INTEGER NOT NULL,
                invoice_date TEXT NOT NULL,
                due_date TEXT NOT NULL,
                subtotal TEXT NOT NULL,
                tax_rate TEXT NOT NULL,
                tax_amount TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                balance TEXT NOT NULL,
                status TEXT NOT NULL,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS invoice_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id INTEGER NOT NULL,
                description TEXT NOT NULL,
                quantity TEXT NOT NULL,
                unit_price TEXT NOT NULL,
                line_total TEXT NOT NULL,
                account_id TEXT,
                FOREIGN KEY (invoice_id) REFERENCES invoices(id)
            );

            CREATE TABLE IF NOT EXISTS bills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bill_number TEXT NOT NULL UNIQUE,
                vendor_id INTEGER NOT NULL,
                bill_date TEXT NOT NULL,
                due_date TEXT NOT NULL,
                subtotal TEXT NOT NULL,
                tax_rate TEXT NOT NULL,
                tax_amount TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                balance TEXT NOT NULL,
                status TEXT NOT NULL,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS bill_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bill_id INTEGER NOT NULL,
                description TEXT NOT NULL,
                quantity TEXT NOT NULL,
                unit_price TEXT NOT NULL,
                line_total TEXT NOT NULL,
                account_id TEXT,
                FOREIGN KEY (bill_id) REFERENCES bills(id)
            );

            CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payment_number TEXT NOT NULL UNIQUE,
                counterparty_kind TEXT NOT NULL,
                counterparty_id INTEGER NOT NULL,
                payment_date TEXT NOT NULL,
                amount TEXT NOT NULL,
                payment_method TEXT NOT NULL,
                reference TEXT,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS sequence_counters (
                scope TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }
}

fn date_to_str(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

fn str_to_date(s: &str) -> Result<Date, StorageError> {
    let invalid = || StorageError::Other(format!("invalid date in store: {s}"));
    let mut parts = s.splitn(3, '-');
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let month: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let day: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let month = Month::try_from(month).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

fn str_to_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Other(format!("invalid decimal: {e}")))
}

fn str_to_account_type(s: &str) -> AccountType {
    match s {
        "LIABILITY" => AccountType::Liability,
        "EQUITY" => AccountType::Equity,
        "INCOME" => AccountType::Income,
        "EXPENSE" => AccountType::Expense,
        _ => AccountType::Asset,
    }
}

fn str_to_payment_method(s: &str) -> PaymentMethod {
    match s {
        "cash" => PaymentMethod::Cash,
        "check" => PaymentMethod::Check,
        "credit_card" => PaymentMethod::CreditCard,
        _ => PaymentMethod::BankTransfer,
    }
}

fn constraint_error(e: rusqlite::Error, reference: &str) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::DuplicateReference(reference.to_string())
        }
        other => StorageError::Other(other.to_string()),
    }
}

struct TemplateRow {
    id: i64,
    name: String,
    description: Option<String>,
    frequency: String,
    frequency_value: i64,
    start_date: String,
    end_date: Option<String>,
    next_run_date: String,
    last_run_date: Option<String>,
    is_active: i64,
    template_data: String,
    created_by: Option<String>,
}

const TEMPLATE_COLUMNS: &str = "id, name, description, frequency, frequency_value, start_date, \
     end_date, next_run_date, last_run_date, is_active, template_data, created_by";

fn read_template_row(row: &rusqlite::Row) -> rusqlite::Result<TemplateRow> {
    Ok(TemplateRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        frequency: row.get(3)?,
        frequency_value: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        next_run_date: row.get(7)?,
        last_run_date: row.get(8)?,
        is_active: row.get(9)?,
        template_data: row.get(10)?,
        created_by: row.get(11)?,
    })
}

fn template_from_row(raw: TemplateRow) -> Result<RecurringTemplate, StorageError> {
    Ok(RecurringTemplate {
        id: raw.id,
        name: raw.name,
        description: raw.description,
        frequency: raw
            .frequency
            .parse::<Frequency>()
            .map_err(|e| StorageError::Other(e.to_string()))?,
        frequency_value: u32::try_from(raw.frequency_value)
            .map_err(|_| StorageError::Other("negative frequency_value in store".to_string()))?,
        start_date: str_to_date(&raw.start_date)?,
        end_date: raw.end_date.as_deref().map(str_to_date).transpose()?,
        next_run_date: str_to_date(&raw.next_run_date)?,
        last_run_date: raw.last_run_date.as_deref().map(str_to_date).transpose()?,
        is_active: raw.is_active != 0,
        data: serde_json::from_str::<TemplateData>(&raw.template_data)
            .map_err(|e| StorageError::Other(format!("invalid template_data: {e}")))?,
        created_by: raw.created_by,
    })
}

fn read_item_row(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn document_line_from_row(
    (description, quantity, unit_price, line_total, account_id): (
        String,
        String,
        String,
        String,
        Option<String>,
    ),
) -> Result<DocumentLine, StorageError> {
    Ok(DocumentLine {
        description,
        quantity: str_to_decimal(&quantity)?,
        unit_price: str_to_decimal(&unit_price)?,
        line_total: str_to_decimal(&line_total)?,
        account_id,
    })
}

impl SqliteStorage {
    fn write_template(
        conn: &Connection,
        template: &RecurringTemplate,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_string(&template.data)
            .map_err(|e| StorageError::Other(e.to_string()))?;
        conn.execute(
            "UPDATE recurring_templates
             SET name = ?1, description = ?2, frequency = ?3, frequency_value = ?4,
                 end_date = ?5, next_run_date = ?6, last_run_date = ?7, is_active = ?8,
                 template_data = ?9
             WHERE id = ?10",
            params![
                template.name,
                template.description,
                template.frequency.as_str(),
                template.frequency_value,
                template.end_date.map(date_to_str),
                date_to_str(template.next_run_date),
                template.last_run_date.map(date_to_str),
                template.is_active as i64,
                data,
                template.id,
            ],
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    fn load_template(
        conn: &Connection,
        id: TemplateId,
    ) -> Result<Option<RecurringTemplate>, StorageError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates WHERE id = ?1");
        match conn.query_row(&sql, params![id], read_template_row) {
            Ok(raw) => Ok(Some(template_from_row(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }
}

impl StorageBackend for SqliteStorage {
    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO accounts (id, name, account_type) VALUES (?1, ?2, ?3)",
            params![account.id, account.name, account.account_type.as_str()],
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    fn account_exists(&self, account_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Other(e.to_string()))
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, account_type FROM accounts ORDER BY id")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            let (id, name, account_type) = row.map_err(|e| StorageError::Other(e.to_string()))?;
            result.push(Account {
                id,
                name,
                account_type: str_to_account_type(&account_type),
            });
        }
        Ok(result)
    }

    fn insert_template(&self, template: &NewTemplate) -> Result<TemplateId, StorageError> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(&template.data)
            .map_err(|e| StorageError::Other(e.to_string()))?;
        conn.execute(
            "INSERT INTO recurring_templates (name, description, frequency, frequency_value,
                start_date, end_date, next_run_date, last_run_date, is_active, template_data,
                created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10)",
            params![
                template.name,
                template.description,
                template.frequency.as_str(),
                template.frequency_value,
                date_to_str(template.start_date),
                template.end_date.map(date_to_str),
                date_to_str(template.next_run_date),
                template.is_active as i64,
                data,
                template.created_by,
            ],
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    fn get_template(&self, id: TemplateId) -> Result<Option<RecurringTemplate>, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::load_template(&conn, id)
    }

    fn list_templates(&self) -> Result<Vec<RecurringTemplate>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates ORDER BY id");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows = stmt
            .query_map([], read_template_row)
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(template_from_row(
                row.map_err(|e| StorageError::Other(e.to_string()))?,
            )?);
        }
        Ok(result)
    }

    fn update_template(
        &self,
        id: TemplateId,
        patch: &TemplateUpdate,
    ) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        match Self::load_template(&conn, id)? {
            Some(mut template) => {
                patch.apply(&mut template);
                Self::write_template(&conn, &template)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_template(&self, id: TemplateId) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute("DELETE FROM recurring_templates WHERE id = ?1", params![id])
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(affected > 0)
    }

    fn due_templates(&self, as_of: Date) -> Result<Vec<RecurringTemplate>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM recurring_templates
             WHERE is_active = 1 AND next_run_date <= ?1
               AND (end_date IS NULL OR end_date >= ?1)
             ORDER BY next_run_date, id"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows = stmt
            .query_map(params![date_to_str(as_of)], read_template_row)
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(template_from_row(
                row.map_err(|e| StorageError::Other(e.to_string()))?,
            )?);
        }
        Ok(result)
    }

    fn claim_template(
        &self,
        id: TemplateId,
        expected_next_run: Date,
        last_run: Date,
        next_run: Date,
    ) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        // Single conditional UPDATE: the claim either lands atomically or
        // reports that someone else already advanced the schedule.
        let affected = conn
            .execute(
                "UPDATE recurring_templates SET last_run_date = ?1, next_run_date = ?2
                 WHERE id = ?3 AND is_active = 1 AND next_run_date = ?4",
                params![
                    date_to_str(last_run),
                    date_to_str(next_run),
                    id,
                    date_to_str(expected_next_run),
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(affected > 0)
    }

    fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO journal_entries (entry_number, entry_date, description, total_debit,
                total_credit, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.entry_number,
                date_to_str(entry.entry_date),
                entry.description,
                entry.total_debit.to_string(),
                entry.total_credit.to_string(),
                entry.status.as_str(),
            ],
        )
        .map_err(|e| constraint_error(e, &entry.entry_number))?;

        let entry_id = conn.last_insert_rowid();
        for line in &entry.lines {
            conn.execute(
                "INSERT INTO journal_entry_lines (journal_entry_id, account_id, debit, credit, memo)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry_id,
                    line.account_id,
                    line.debit.to_string(),
                    line.credit.to_string(),
                    line.memo,
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        }
        Ok(())
    }

    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO invoices (invoice_number, customer_id, invoice_date, due_date, subtotal,
                tax_rate, tax_amount, total_amount, balance, status, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                invoice.invoice_number,
                invoice.customer_id,
                date_to_str(invoice.invoice_date),
                date_to_str(invoice.due_date),
                invoice.subtotal.to_string(),
                invoice.tax_rate.to_string(),
                invoice.tax_amount.to_string(),
                invoice.total_amount.to_string(),
                invoice.balance.to_string(),
                invoice.status.as_str(),
                invoice.notes,
            ],
        )
        .map_err(|e| constraint_error(e, &invoice.invoice_number))?;

        let invoice_id = conn.last_insert_rowid();
        for item in &invoice.items {
            conn.execute(
                "INSERT INTO invoice_items (invoice_id, description, quantity, unit_price,
                    line_total, account_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    invoice_id,
                    item.description,
                    item.quantity.to_string(),
                    item.unit_price.to_string(),
                    item.line_total.to_string(),
                    item.account_id,
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        }
        Ok(())
    }

    fn insert_bill(&self, bill: &Bill) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bills (bill_number, vendor_id, bill_date, due_date, subtotal, tax_rate,
                tax_amount, total_amount, balance, status, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                bill.bill_number,
                bill.vendor_id,
                date_to_str(bill.bill_date),
                date_to_str(bill.due_date),
                bill.subtotal.to_string(),
                bill.tax_rate.to_string(),
                bill.tax_amount.to_string(),
                bill.total_amount.to_string(),
                bill.balance.to_string(),
                bill.status.as_str(),
                bill.notes,
            ],
        )
        .map_err(|e| constraint_error(e, &bill.bill_number))?;

        let bill_id = conn.last_insert_rowid();
        for item in &bill.items {
            conn.execute(
                "INSERT INTO bill_items (bill_id, description, quantity, unit_price, line_total,
                    account_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    bill_id,
                    item.description,
                    item.quantity.to_string(),
                    item.unit_price.to_string(),
                    item.line_total.to_string(),
                    item.account_id,
                ],
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        }
        Ok(())
    }

    fn insert_payment(&self, payment: &Payment) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        let (kind, counterparty_id) = match payment.counterparty {
            Counterparty::Vendor(id) => ("vendor", id),
            Counterparty::Customer(id) => ("customer", id),
        };
        conn.execute(
            "INSERT INTO payments (payment_number, counterparty_kind, counterparty_id,
                payment_date, amount, payment_method, reference, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                payment.payment_number,
                kind,
                counterparty_id,
                date_to_str(payment.payment_date),
                payment.amount.to_string(),
                payment.method.as_str(),
                payment.reference,
                payment.notes,
            ],
        )
        .map_err(|e| constraint_error(e, &payment.payment_number))?;
        Ok(())
    }

    fn journal_entries(&self) -> Result<Vec<JournalEntry>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, entry_number, entry_date, description, total_debit, total_credit,
                    status
                 FROM journal_entries ORDER BY id",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for (id, entry_number, entry_date, description, total_debit, total_credit, status) in
            headers
        {
            let mut line_stmt = conn
                .prepare(
                    "SELECT account_id, debit, credit, memo
                     FROM journal_entry_lines WHERE journal_entry_id = ?1 ORDER BY id",
                )
                .map_err(|e| StorageError::Other(e.to_string()))?;
            let raw_lines = line_stmt
                .query_map(params![id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(|e| StorageError::Other(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::Other(e.to_string()))?;

            let mut lines = Vec::new();
            for (account_id, debit, credit, memo) in raw_lines {
                lines.push(JournalLine {
                    account_id,
                    debit: str_to_decimal(&debit)?,
                    credit: str_to_decimal(&credit)?,
                    memo,
                });
            }

            result.push(JournalEntry {
                entry_number,
                entry_date: str_to_date(&entry_date)?,
                description,
                total_debit: str_to_decimal(&total_debit)?,
                total_credit: str_to_decimal(&total_credit)?,
                status: if status == "posted" {
                    EntryStatus::Posted
                } else {
                    EntryStatus::Draft
                },
                lines,
            });
        }
        Ok(result)
    }

    fn invoices(&self) -> Result<Vec<Invoice>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, invoice_number, customer_id, invoice_date, due_date, subtotal,
                    tax_rate, tax_amount, total_amount, balance, status, notes
                 FROM invoices ORDER BY id",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, Option<String>>(11)?,
                ))
            })
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for (
            id,
            invoice_number,
            customer_id,
            invoice_date,
            due_date,
            subtotal,
            tax_rate,
            tax_amount,
            total_amount,
            balance,
            status,
            notes,
        ) in headers
        {
            let mut item_stmt = conn
                .prepare(
                    "SELECT description, quantity, unit_price, line_total, account_id
                     FROM invoice_items WHERE invoice_id = ?1 ORDER BY id",
                )
                .map_err(|e| StorageError::Other(e.to_string()))?;
            let raw_items = item_stmt
                .query_map(params![id], read_item_row)
                .map_err(|e| StorageError::Other(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::Other(e.to_string()))?;

            let mut items = Vec::new();
            for raw in raw_items {
                items.push(document_line_from_row(raw)?);
            }

            result.push(Invoice {
                invoice_number,
                customer_id,
                invoice_date: str_to_date(&invoice_date)?,
                due_date: str_to_date(&due_date)?,
                subtotal: str_to_decimal(&subtotal)?,
                tax_rate: str_to_decimal(&tax_rate)?,
                tax_amount: str_to_decimal(&tax_amount)?,
                total_amount: str_to_decimal(&total_amount)?,
                balance: str_to_decimal(&balance)?,
                status: match status.as_str() {
                    "sent" => InvoiceStatus::Sent,
                    "paid" => InvoiceStatus::Paid,
                    _ => InvoiceStatus::Draft,
                },
                notes,
                items,
            });
        }
        Ok(result)
    }

    fn bills(&self) -> Result<Vec<Bill>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, bill_number, vendor_id, bill_date, due_date, subtotal, tax_rate,
                    tax_amount, total_amount, balance, status, notes
                 FROM bills ORDER BY id",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, Option<String>>(11)?,
                ))
            })
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for (
            id,
            bill_number,
            vendor_id,
            bill_date,
            due_date,
            subtotal,
            tax_rate,
            tax_amount,
            total_amount,
            balance,
            status,
            notes,
        ) in headers
        {
            let mut item_stmt = conn
                .prepare(
                    "SELECT description, quantity, unit_price, line_total, account_id
                     FROM bill_items WHERE bill_id = ?1 ORDER BY id",
                )
                .map_err(|e| StorageError::Other(e.to_string()))?;
            let raw_items = item_stmt
                .query_map(params![id], read_item_row)
                .map_err(|e| StorageError::Other(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::Other(e.to_string()))?;

            let mut items = Vec::new();
            for raw in raw_items {
                items.push(document_line_from_row(raw)?);
            }

            result.push(Bill {
                bill_number,
                vendor_id,
                bill_date: str_to_date(&bill_date)?,
                due_date: str_to_date(&due_date)?,
                subtotal: str_to_decimal(&subtotal)?,
                tax_rate: str_to_decimal(&tax_rate)?,
                tax_amount: str_to_decimal(&tax_amount)?,
                total_amount: str_to_decimal(&total_amount)?,
                balance: str_to_decimal(&balance)?,
                status: match status.as_str() {
                    "approved" => BillStatus::Approved,
                    "paid" => BillStatus::Paid,
                    _ => BillStatus::Draft,
                },
                notes,
                items,
            });
        }
        Ok(result)
    }

    fn payments(&self) -> Result<Vec<Payment>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT payment_number, counterparty_kind, counterparty_id, payment_date, amount,
                    payment_method, reference, notes
                 FROM payments ORDER BY id",
            )
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(|e| StorageError::Other(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut result = Vec::new();
        for (payment_number, kind, counterparty_id, payment_date, amount, method, reference, notes) in
            rows
        {
            result.push(Payment {
                payment_number,
                counterparty: if kind == "customer" {
                    Counterparty::Customer(counterparty_id)
                } else {
                    Counterparty::Vendor(counterparty_id)
                },
                payment_date: str_to_date(&payment_date)?,
                amount: str_to_decimal(&amount)?,
                method: str_to_payment_method(&method),
                reference,
                notes,
            });
        }
        Ok(result)
    }

    fn next_sequence(&self, scope: &str) -> Result<u64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sequence_counters (scope, value) VALUES (?1, 0)",
            params![scope],
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        conn.execute(
            "UPDATE sequence_counters SET value = value + 1 WHERE scope = ?1",
            params![scope],
        )
        .map_err(|e| StorageError::Other(e.to_string()))?;
        conn.query_row(
            "SELECT value FROM sequence_counters WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Other(e.to_string()))
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut active = self.active_tx.lock().unwrap();
        while active.is_some() {
            active = self.tx_done.wait(active).unwrap();
        }
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("SAVEPOINT recurd_tx")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        drop(conn);
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *active = Some(tx_id);
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx.lock().unwrap();
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("RELEASE SAVEPOINT recurd_tx")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        drop(conn);
        *active = None;
        self.tx_done.notify_one();
        tracing::debug!(tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx.lock().unwrap();
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("ROLLBACK TO SAVEPOINT recurd_tx; RELEASE SAVEPOINT recurd_tx")
            .map_err(|e| StorageError::Other(e.to_string()))?;
        drop(conn);
        *active = None;
        self.tx_done.notify_one();
        tracing::debug!(tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}
