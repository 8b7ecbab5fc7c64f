//! Net balance calculator.
//!
//! Folds ledger entries into per-currency, per-user net positions. A
//! positive value means the user is owed money, a negative value means the
//! user owes. Soft-deleted entries contribute nothing.

use std::collections::BTreeMap;

use crate::{
    Currency,
    entry::{LedgerEntry, entry_deltas},
};

/// Net position per user, keyed by currency. Ordered maps keep iteration
/// and serialization deterministic.
pub type BalanceMap = BTreeMap<Currency, BTreeMap<String, i64>>;

/// Adds `deltas` into `balances`, with `sign` `+1` to apply or `-1` to
/// reverse. Users and currencies that land on exactly zero are pruned so
/// that applying and reversing the same entry leaves no trace.
pub fn merge_deltas(balances: &mut BalanceMap, deltas: &BalanceMap, sign: i64) {
    for (currency, per_user) in deltas {
        let bucket = balances.entry(*currency).or_default();
        for (user_id, delta) in per_user {
            let slot = bucket.entry(user_id.clone()).or_insert(0);
            *slot += sign * delta;
            if *slot == 0 {
                bucket.remove(user_id);
            }
        }
        if balances.get(currency).is_some_and(BTreeMap::is_empty) {
            balances.remove(currency);
        }
    }
}

/// Net balances of a whole entry list, the reference the incremental path
/// must agree with.
pub fn net_balances<'a, I>(entries: I) -> BalanceMap
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut balances = BalanceMap::new();
    for entry in entries {
        if entry.is_deleted() {
            continue;
        }
        merge_deltas(&mut balances, &entry_deltas(entry), 1);
    }
    balances
}
