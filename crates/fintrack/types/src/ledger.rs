//! Tenant-side ledger records
//!
//! Expenses and income live in the tenant store. They are plain data; the
//! interesting part is how the store handle they are written through gets
//! resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::account::InvalidAccount;
use crate::ids::{AccountId, EntryId};

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Expense,
    Income,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Expense => "expense",
            EntryKind::Income => "income",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = InvalidAccount;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expense" => Ok(EntryKind::Expense),
            "income" => Ok(EntryKind::Income),
            other => Err(InvalidAccount::new(
                "kind",
                format!("expected expense or income, got '{other}'"),
            )),
        }
    }
}

/// A stored expense or income line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub title: String,
    /// Amount in minor currency units; always positive, direction is `kind`.
    pub amount_minor: i64,
    pub category: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_by: AccountId,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a ledger entry
#[derive(Debug, Clone, Deserialize)]
pub struct NewLedgerEntry {
    pub kind: EntryKind,
    pub title: String,
    pub amount_minor: i64,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    /// Validate and stamp into a storable entry.
    pub fn into_entry(
        self,
        created_by: AccountId,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, InvalidAccount> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(InvalidAccount::new("title", "is required"));
        }
        let category = self.category.trim().to_string();
        if category.is_empty() {
            return Err(InvalidAccount::new("category", "is required"));
        }
        if self.amount_minor <= 0 {
            return Err(InvalidAccount::new("amount_minor", "must be positive"));
        }

        Ok(LedgerEntry {
            id: EntryId::generate(),
            kind: self.kind,
            title,
            amount_minor: self.amount_minor,
            category,
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            occurred_at: self.occurred_at.unwrap_or(now),
            created_by,
            created_at: now,
        })
    }
}

/// Sums over a tenant's ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub expense_minor: i64,
    pub income_minor: i64,
    pub entries: u64,
}

impl LedgerTotals {
    pub fn balance_minor(&self) -> i64 {
        self.income_minor - self.expense_minor
    }

    pub fn add(&mut self, entry: &LedgerEntry) {
        match entry.kind {
            EntryKind::Expense => self.expense_minor += entry.amount_minor,
            EntryKind::Income => self.income_minor += entry.amount_minor,
        }
        self.entries += 1;
    }
}
