use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::posting::PostingError;
use crate::schedule::ScheduleError;

pub type TemplateId = i64;

/// Recurrence cadence of a template. The interval length is this unit
/// multiplied by `frequency_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(ScheduleError::InvalidFrequency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    JournalEntry,
    Invoice,
    Bill,
    Payment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::JournalEntry => "journal_entry",
            TransactionType::Invoice => "invoice",
            TransactionType::Bill => "bill",
            TransactionType::Payment => "payment",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = PostingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "journal_entry" => Ok(TransactionType::JournalEntry),
            "invoice" => Ok(TransactionType::Invoice),
            "bill" => Ok(TransactionType::Bill),
            "payment" => Ok(TransactionType::Payment),
            other => Err(PostingError::UnsupportedType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
        }
    }
}

/// A chart-of-accounts entry. Read-only from the scheduler's perspective;
/// template lines must reference an existing account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub account_type: AccountType,
}

/// One debit or credit line inside a journal-entry template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLine {
    pub account_id: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalTemplate {
    #[serde(default)]
    pub debits: Vec<EntryLine>,
    #[serde(default)]
    pub credits: Vec<EntryLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLine {
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

fn default_quantity() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTemplate {
    pub customer_id: i64,
    #[serde(default)]
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Date>,
    #[serde(default)]
    pub items: Vec<ItemLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillTemplate {
    pub vendor_id: i64,
    #[serde(default)]
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Date>,
    #[serde(default)]
    pub items: Vec<ItemLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Transaction-type-specific payload of a recurring template, validated at
/// deserialization time. Each variant carries exactly the fields its poster
/// needs; an unrecognized tag never survives parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transaction_type", rename_all = "snake_case")]
pub enum TemplateData {
    JournalEntry(JournalTemplate),
    Invoice(InvoiceTemplate),
    Bill(BillTemplate),
    Payment(PaymentTemplate),
}

impl TemplateData {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TemplateData::JournalEntry(_) => TransactionType::JournalEntry,
            TemplateData::Invoice(_) => TransactionType::Invoice,
            TemplateData::Bill(_) => TransactionType::Bill,
            TemplateData::Payment(_) => TransactionType::Payment,
        }
    }

    /// Parses an untagged payload against the declared transaction type.
    pub fn from_value(
        kind: TransactionType,
        value: serde_json::Value,
    ) -> Result<Self, PostingError> {
        let invalid = |e: serde_json::Error| PostingError::InvalidTemplate(e.to_string());
        Ok(match kind {
            TransactionType::JournalEntry => {
                TemplateData::JournalEntry(serde_json::from_value(value).map_err(invalid)?)
            }
            TransactionType::Invoice => {
                TemplateData::Invoice(serde_json::from_value(value).map_err(invalid)?)
            }
            TransactionType::Bill => {
                TemplateData::Bill(serde_json::from_value(value).map_err(invalid)?)
            }
            TransactionType::Payment => {
                TemplateData::Payment(serde_json::from_value(value).map_err(invalid)?)
            }
        })
    }

    /// The payload without its type tag, for API responses.
    pub fn inner_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            TemplateData::JournalEntry(t) => serde_json::to_value(t),
            TemplateData::Invoice(t) => serde_json::to_value(t),
            TemplateData::Bill(t) => serde_json::to_value(t),
            TemplateData::Payment(t) => serde_json::to_value(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurringTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub frequency_value: u32,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub next_run_date: Date,
    pub last_run_date: Option<Date>,
    pub is_active: bool,
    pub data: TemplateData,
    pub created_by: Option<String>,
}

/// Template fields as supplied at creation; the id is assigned by storage and
/// `next_run_date` is computed by the caller before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub frequency_value: u32,
    pub start_date: Date,
    pub end_date: Option<Date>,
    pub next_run_date: Date,
    pub is_active: bool,
    pub data: TemplateData,
    pub created_by: Option<String>,
}

/// Partial update of a template. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub frequency: Option<Frequency>,
    pub frequency_value: Option<u32>,
    pub end_date: Option<Date>,
    pub is_active: Option<bool>,
    pub data: Option<TemplateData>,
    pub next_run_date: Option<Date>,
}

impl TemplateUpdate {
    pub fn apply(&self, template: &mut RecurringTemplate) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }
        if let Some(description) = &self.description {
            template.description = Some(description.clone());
        }
        if let Some(frequency) = self.frequency {
            template.frequency = frequency;
        }
        if let Some(value) = self.frequency_value {
            template.frequency_value = value;
        }
        if let Some(end_date) = self.end_date {
            template.end_date = Some(end_date);
        }
        if let Some(active) = self.is_active {
            template.is_active = active;
        }
        if let Some(data) = &self.data {
            template.data = data.clone();
        }
        if let Some(next) = self.next_run_date {
            template.next_run_date = next;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Posted => "posted",
        }
    }
}

/// One leg of a journal entry. Exactly one of `debit`/`credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalLine {
    pub account_id: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub entry_number: String,
    pub entry_date: Date,
    pub description: String,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub status: EntryStatus,
    pub lines: Vec<JournalLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Draft,
    Approved,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Draft => "draft",
            BillStatus::Approved => "approved",
            BillStatus::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub invoice_number: String,
    pub customer_id: i64,
    pub invoice_date: Date,
    pub due_date: Date,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub balance: Decimal,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub items: Vec<DocumentLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bill {
    pub bill_number: String,
    pub vendor_id: i64,
    pub bill_date: Date,
    pub due_date: Date,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub balance: Decimal,
    pub status: BillStatus,
    pub notes: Option<String>,
    pub items: Vec<DocumentLine>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    BankTransfer,
    Cash,
    Check,
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Check => "check",
            PaymentMethod::CreditCard => "credit_card",
        }
    }
}

/// Who a disbursement goes to or comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counterparty {
    Vendor(i64),
    Customer(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub payment_number: String,
    pub counterparty: Counterparty,
    pub payment_date: Date,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}
