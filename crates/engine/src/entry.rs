//! Ledger entries.
//!
//! A [`LedgerEntry`] is anything that moves balances: an expense or a
//! settlement. Both the incremental snapshot updater and the full
//! recompute consume entries only through [`entry_deltas`], so the two
//! paths cannot disagree on an entry's balance effect.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::{Expense, Settlement, balance::BalanceMap};

#[derive(Clone, Debug, PartialEq)]
pub enum LedgerEntry {
    Expense(Expense),
    Settlement(Settlement),
}

impl LedgerEntry {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Expense(expense) => expense.id,
            Self::Settlement(settlement) => settlement.id,
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Self::Expense(expense) => &expense.group_id,
            Self::Settlement(settlement) => &settlement.group_id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Self::Expense(expense) => expense.deleted_at.is_some(),
            Self::Settlement(settlement) => settlement.deleted_at.is_some(),
        }
    }
}

/// A balance-affecting change to a single entry, as seen by the snapshot
/// updater. `Update` carries both versions so the old effect can be
/// reversed before the new one is applied.
#[derive(Clone, Copy, Debug)]
pub enum EntryMutation<'a> {
    Create(&'a LedgerEntry),
    Update {
        old: &'a LedgerEntry,
        new: &'a LedgerEntry,
    },
    Delete(&'a LedgerEntry),
}

impl EntryMutation<'_> {
    pub fn group_id(&self) -> &str {
        match self {
            Self::Create(entry) | Self::Delete(entry) => entry.group_id(),
            Self::Update { new, .. } => new.group_id(),
        }
    }
}

/// Per-user balance deltas of a single live entry, keyed by currency.
///
/// For an expense each participant is debited their split and the payer is
/// credited the split sum, so the deltas of one entry always sum to zero
/// per currency. Using the split sum rather than the stated total is what
/// absorbs the 1 minor-unit rounding tolerance on the payer's side.
///
/// For a settlement the payer gains and the payee loses the amount.
pub fn entry_deltas(entry: &LedgerEntry) -> BalanceMap {
    let mut deltas: BalanceMap = BTreeMap::new();
    match entry {
        LedgerEntry::Expense(expense) => {
            let per_user = deltas.entry(expense.currency).or_default();
            let mut credited: i64 = 0;
            for split in &expense.splits {
                *per_user.entry(split.user_id.clone()).or_insert(0) -= split.amount_minor;
                credited += split.amount_minor;
            }
            *per_user.entry(expense.paid_by.clone()).or_insert(0) += credited;
        }
        LedgerEntry::Settlement(settlement) => {
            let per_user = deltas.entry(settlement.currency).or_default();
            *per_user.entry(settlement.payer_id.clone()).or_insert(0) += settlement.amount_minor;
            *per_user.entry(settlement.payee_id.clone()).or_insert(0) -= settlement.amount_minor;
        }
    }
    deltas
}
