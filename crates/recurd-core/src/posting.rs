use rust_decimal::Decimal;
use thiserror::Error;
use time::{Date, Duration};

use crate::models::{
    Bill, BillStatus, BillTemplate, Counterparty, DocumentLine, EntryStatus, Invoice,
    InvoiceStatus, InvoiceTemplate, JournalEntry, JournalLine, Payment, PaymentTemplate,
};
use crate::schedule::ScheduleError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum PostingError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    #[error("unsupported transaction type: {0}")]
    UnsupportedType(String),
    #[error("journal entry out of balance: debits {debits} != credits {credits}")]
    UnbalancedEntry { debits: Decimal, credits: Decimal },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Builds a journal entry line by line and refuses to yield one whose debits
/// and credits do not match to the cent. The only way to obtain a `posted`
/// entry is through `build`, so the double-entry invariant holds structurally.
pub struct JournalEntryBuilder {
    entry_number: String,
    entry_date: Date,
    description: String,
    lines: Vec<JournalLine>,
}

impl JournalEntryBuilder {
    pub fn new(
        entry_number: impl Into<String>,
        entry_date: Date,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entry_number: entry_number.into(),
            entry_date,
            description: description.into(),
            lines: Vec::new(),
        }
    }

    pub fn debit(
        mut self,
        account_id: impl Into<String>,
        amount: Decimal,
        memo: Option<String>,
    ) -> Self {
        self.lines.push(JournalLine {
            account_id: account_id.into(),
            debit: amount,
            credit: Decimal::ZERO,
            memo,
        });
        self
    }

    pub fn credit(
        mut self,
        account_id: impl Into<String>,
        amount: Decimal,
        memo: Option<String>,
    ) -> Self {
        self.lines.push(JournalLine {
            account_id: account_id.into(),
            debit: Decimal::ZERO,
            credit: amount,
            memo,
        });
        self
    }

    pub fn build(self) -> Result<JournalEntry, PostingError> {
        if self.lines.is_empty() {
            return Err(PostingError::InvalidTemplate(
                "journal entry has no lines".to_string(),
            ));
        }
        let total_debit: Decimal = self.lines.iter().map(|l| l.debit).sum();
        let total_credit: Decimal = self.lines.iter().map(|l| l.credit).sum();
        if total_debit.round_dp(2) != total_credit.round_dp(2) {
            return Err(PostingError::UnbalancedEntry {
                debits: total_debit,
                credits: total_credit,
            });
        }
        Ok(JournalEntry {
            entry_number: self.entry_number,
            entry_date: self.entry_date,
            description: self.description,
            total_debit,
            total_credit,
            status: EntryStatus::Posted,
            lines: self.lines,
        })
    }
}

/// Sales-tax amount on a subtotal, rounded to the cent.
pub fn tax_amount(subtotal: Decimal, tax_rate: Decimal) -> Decimal {
    (subtotal * tax_rate / Decimal::ONE_HUNDRED).round_dp(2)
}

fn document_lines(items: &[crate::models::ItemLine]) -> Vec<DocumentLine> {
    items
        .iter()
        .map(|item| DocumentLine {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.quantity * item.unit_price,
            account_id: item.account_id.clone(),
        })
        .collect()
}

impl Invoice {
    /// Materializes an invoice from a template. Due date falls back to
    /// thirty days after the invoice date.
    pub fn from_template(
        template: &InvoiceTemplate,
        invoice_number: String,
        invoice_date: Date,
        notes: Option<String>,
    ) -> Self {
        let tax = tax_amount(template.subtotal, template.tax_rate);
        let total = template.subtotal + tax;
        Invoice {
            invoice_number,
            customer_id: template.customer_id,
            invoice_date,
            due_date: template
                .due_date
                .unwrap_or_else(|| invoice_date.saturating_add(Duration::days(30))),
            subtotal: template.subtotal,
            tax_rate: template.tax_rate,
            tax_amount: tax,
            total_amount: total,
            balance: total,
            status: InvoiceStatus::Sent,
            notes,
            items: document_lines(&template.items),
        }
    }
}

impl Bill {
    pub fn from_template(
        template: &BillTemplate,
        bill_number: String,
        bill_date: Date,
        notes: Option<String>,
    ) -> Self {
        let tax = tax_amount(template.subtotal, template.tax_rate);
        let total = template.subtotal + tax;
        Bill {
            bill_number,
            vendor_id: template.vendor_id,
            bill_date,
            due_date: template
                .due_date
                .unwrap_or_else(|| bill_date.saturating_add(Duration::days(30))),
            subtotal: template.subtotal,
            tax_rate: template.tax_rate,
            tax_amount: tax,
            total_amount: total,
            balance: total,
            status: BillStatus::Approved,
            notes,
            items: document_lines(&template.items),
        }
    }
}

impl Payment {
    /// Materializes a disbursement. The counterparty is whichever of
    /// vendor/customer the template names; neither is an invalid template.
    pub fn from_template(
        template: &PaymentTemplate,
        payment_number: String,
        payment_date: Date,
        notes: Option<String>,
    ) -> Result<Self, PostingError> {
        let counterparty = template
            .vendor_id
            .map(Counterparty::Vendor)
            .or_else(|| template.customer_id.map(Counterparty::Customer))
            .ok_or_else(|| {
                PostingError::InvalidTemplate(
                    "payment template needs a vendor_id or customer_id".to_string(),
                )
            })?;
        Ok(Payment {
            payment_number,
            counterparty,
            payment_date,
            amount: template.amount,
            method: template.payment_method.unwrap_or_default(),
            reference: template.reference.clone(),
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemLine, PaymentMethod};
    use rust_decimal_macros::dec;
    use time::macros::date;

    #[test]
    fn balanced_entry_builds_with_matching_totals() {
        let entry = JournalEntryBuilder::new("JE-2025-0001", date!(2025 - 03 - 01), "Rent")
            .debit("rent_expense", dec!(600.00), None)
            .debit("utilities", dec!(400.00), None)
            .credit("bank", dec!(1000.00), Some("monthly sweep".to_string()))
            .build()
            .unwrap();

        assert_eq!(entry.total_debit, dec!(1000.00));
        assert_eq!(entry.total_credit, dec!(1000.00));
        assert_eq!(entry.status, EntryStatus::Posted);
        assert_eq!(entry.lines.len(), 3);
    }

    #[test]
    fn unbalanced_entry_is_refused() {
        let err = JournalEntryBuilder::new("JE-2025-0002", date!(2025 - 03 - 01), "Oops")
            .debit("rent_expense", dec!(1000.00), None)
            .credit("bank", dec!(999.99), None)
            .build()
            .unwrap_err();

        match err {
            PostingError::UnbalancedEntry { debits, credits } => {
                assert_eq!(debits, dec!(1000.00));
                assert_eq!(credits, dec!(999.99));
            }
            other => panic!("expected UnbalancedEntry, got {other:?}"),
        }
    }

    #[test]
    fn empty_entry_is_refused() {
        let err = JournalEntryBuilder::new("JE-2025-0003", date!(2025 - 03 - 01), "Empty")
            .build()
            .unwrap_err();
        assert!(matches!(err, PostingError::InvalidTemplate(_)));
    }

    #[test]
    fn invoice_totals_follow_tax_rate() {
        let template = InvoiceTemplate {
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
        };
        let invoice = Invoice::from_template(
            &template,
            "INV-2025-0001".to_string(),
            date!(2025 - 03 - 15),
            None,
        );

        assert_eq!(invoice.tax_amount, dec!(120.00));
        assert_eq!(invoice.total_amount, dec!(1120.00));
        assert_eq!(invoice.balance, dec!(1120.00));
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(invoice.due_date, date!(2025 - 04 - 14));
        assert_eq!(invoice.items[0].line_total, dec!(1000.00));
    }

    #[test]
    fn bill_mirrors_invoice_with_approved_status() {
        let template = BillTemplate {
            vendor_id: 7,
            subtotal: dec!(500.00),
            tax_rate: dec!(5),
            due_date: Some(date!(2025 - 04 - 01)),
            items: vec![],
        };
        let bill = Bill::from_template(
            &template,
            "BILL-2025-0001".to_string(),
            date!(2025 - 03 - 15),
            Some("Office lease".to_string()),
        );

        assert_eq!(bill.tax_amount, dec!(25.00));
        assert_eq!(bill.total_amount, dec!(525.00));
        assert_eq!(bill.status, BillStatus::Approved);
        assert_eq!(bill.due_date, date!(2025 - 04 - 01));
    }

    #[test]
    fn payment_defaults_to_bank_transfer() {
        let template = PaymentTemplate {
            vendor_id: Some(7),
            customer_id: None,
            amount: dec!(250.00),
            payment_method: None,
            reference: None,
        };
        let payment = Payment::from_template(
            &template,
            "PAY-2025-0001".to_string(),
            date!(2025 - 03 - 15),
            None,
        )
        .unwrap();

        assert_eq!(payment.method, PaymentMethod::BankTransfer);
        assert_eq!(payment.counterparty, Counterparty::Vendor(7));
    }

    #[test]
    fn payment_without_counterparty_is_invalid() {
        let template = PaymentTemplate {
            vendor_id: None,
            customer_id: None,
            amount: dec!(250.00),
            payment_method: None,
            reference: None,
        };
        let err = Payment::from_template(
            &template,
            "PAY-2025-0002".to_string(),
            date!(2025 - 03 - 15),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PostingError::InvalidTemplate(_)));
    }
}
