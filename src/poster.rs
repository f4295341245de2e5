use std::sync::Arc;

use time::Date;

use recurd_core::models::{
    Bill, Invoice, ItemLine, JournalTemplate, Payment, RecurringTemplate, TemplateData,
    TransactionType,
};
use recurd_core::posting::JournalEntryBuilder;
use recurd_core::{PostingError, StorageBackend};

/// What a fired template produced: the document kind and its reference number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedRef {
    pub kind: TransactionType,
    pub reference: String,
}

/// Turns template payloads into posted ledger documents. Reference numbers
/// are drawn from per-year sequence counters (`JE-2025-0001`), so concurrent
/// posters never collide.
pub struct LedgerPoster {
    storage: Arc<dyn StorageBackend>,
}

impl LedgerPoster {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub fn post(
        &self,
        template: &RecurringTemplate,
        as_of: Date,
    ) -> Result<PostedRef, PostingError> {
        match &template.data {
            TemplateData::JournalEntry(data) => self.post_journal(template, data, as_of),
            TemplateData::Invoice(data) => {
                self.check_item_accounts(&data.items)?;
                let reference = self.reference("INV", as_of)?;
                let invoice = Invoice::from_template(
                    data,
                    reference.clone(),
                    as_of,
                    Some(template.name.clone()),
                );
                self.storage.insert_invoice(&invoice)?;
                Ok(PostedRef {
                    kind: TransactionType::Invoice,
                    reference,
                })
            }
            TemplateData::Bill(data) => {
                self.check_item_accounts(&data.items)?;
                let reference = self.reference("BILL", as_of)?;
                let bill = Bill::from_template(
                    data,
                    reference.clone(),
                    as_of,
                    Some(template.name.clone()),
                );
                self.storage.insert_bill(&bill)?;
                Ok(PostedRef {
                    kind: TransactionType::Bill,
                    reference,
                })
            }
            TemplateData::Payment(data) => {
                let reference = self.reference("PAY", as_of)?;
                let payment = Payment::from_template(
                    data,
                    reference.clone(),
                    as_of,
                    Some(template.name.clone()),
                )?;
                self.storage.insert_payment(&payment)?;
                Ok(PostedRef {
                    kind: TransactionType::Payment,
                    reference,
                })
            }
        }
    }

    fn post_journal(
        &self,
        template: &RecurringTemplate,
        data: &JournalTemplate,
        as_of: Date,
    ) -> Result<PostedRef, PostingError> {
        let reference = self.reference("JE", as_of)?;
        let mut builder = JournalEntryBuilder::new(&reference, as_of, &template.name);
        for line in &data.debits {
            self.check_account(&line.account_id)?;
            builder = builder.debit(&line.account_id, line.amount, line.description.clone());
        }
        for line in &data.credits {
            self.check_account(&line.account_id)?;
            builder = builder.credit(&line.account_id, line.amount, line.description.clone());
        }
        let entry = builder.build()?;
        self.storage.insert_journal_entry(&entry)?;
        Ok(PostedRef {
            kind: TransactionType::JournalEntry,
            reference,
        })
    }

    fn reference(&self, prefix: &str, as_of: Date) -> Result<String, PostingError> {
        let scope = format!("{}-{}", prefix, as_of.year());
        let seq = self.storage.next_sequence(&scope)?;
        Ok(format!("{scope}-{seq:04}"))
    }

    fn check_account(&self, account_id: &str) -> Result<(), PostingError> {
        if !self.storage.account_exists(account_id)? {
            return Err(PostingError::InvalidTemplate(format!(
                "unknown account: {account_id}"
            )));
        }
        Ok(())
    }

    fn check_item_accounts(&self, items: &[ItemLine]) -> Result<(), PostingError> {
        for item in items {
            if let Some(account_id) = &item.account_id {
                self.check_account(account_id)?;
            }
        }
        Ok(())
    }
}
