use chrono::DateTime;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::card::{CardRecord, CardStore, DEFAULT_CARD_NAME, MAX_CARDS};
use crate::datetime::{default_due_millis, within_validity_window};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Maximum 10 cards allowed")]
    TooManyCards,

    #[error("At least one card is required")]
    NoCards,

    #[error("Due date must be within 5 years of today")]
    DateOutOfRange { index: usize },

    #[error("no card at position {index}")]
    NoSuchEntry { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormEntry {
    pub id: Uuid,
    pub name: String,
    pub due_date: i64,
}

impl From<&CardRecord> for FormEntry {
    fn from(card: &CardRecord) -> Self {
        Self {
            id: card.id,
            name: card.name.clone(),
            due_date: card.due_date,
        }
    }
}

/// Editable card list for one widget. Always holds between one and
/// `MAX_CARDS` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigForm {
    entries: Vec<FormEntry>,
}

impl ConfigForm {
    pub fn from_store(store: &CardStore, now: &DateTime<Tz>) -> Self {
        let mut entries: Vec<FormEntry> =
            store.iter().take(MAX_CARDS).map(FormEntry::from).collect();
        if entries.is_empty() {
            entries.push(blank_entry(now));
        }
        Self { entries }
    }

    /// Builds a form from explicit entries, enforcing the entry bounds.
    pub fn from_entries(entries: Vec<FormEntry>) -> Result<Self, FormError> {
        if entries.is_empty() {
            return Err(FormError::NoCards);
        }
        if entries.len() > MAX_CARDS {
            return Err(FormError::TooManyCards);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FormEntry] {
        &self.entries
    }

    pub fn entry_mut(&mut self, index: usize) -> Result<&mut FormEntry, FormError> {
        self.entries
            .get_mut(index)
            .ok_or(FormError::NoSuchEntry { index })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a blank card due on the 15th of next month.
    pub fn add_entry(&mut self, now: &DateTime<Tz>) -> Result<&mut FormEntry, FormError> {
        if self.entries.len() >= MAX_CARDS {
            debug!(cards = self.entries.len(), "rejected card beyond the limit");
            return Err(FormError::TooManyCards);
        }
        self.entries.push(blank_entry(now));
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last])
    }

    pub fn remove_entry(&mut self, index: usize) -> Result<FormEntry, FormError> {
        if index >= self.entries.len() {
            return Err(FormError::NoSuchEntry { index });
        }
        if self.entries.len() == 1 {
            return Err(FormError::NoCards);
        }
        Ok(self.entries.remove(index))
    }

    /// Validates the form and produces the full replacement store.
    pub fn into_store(&self, now: &DateTime<Tz>) -> Result<CardStore, FormError> {
        let mut cards = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            if !within_validity_window(entry.due_date, now) {
                return Err(FormError::DateOutOfRange { index });
            }
            let name = entry.name.trim();
            cards.push(CardRecord {
                id: entry.id,
                name: if name.is_empty() {
                    DEFAULT_CARD_NAME.to_string()
                } else {
                    name.to_string()
                },
                due_date: entry.due_date,
            });
        }
        Ok(CardStore::new(cards))
    }
}

fn blank_entry(now: &DateTime<Tz>) -> FormEntry {
    FormEntry {
        id: Uuid::new_v4(),
        name: String::new(),
        due_date: default_due_millis(now),
    }
}
