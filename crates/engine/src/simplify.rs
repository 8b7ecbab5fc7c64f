//! Debt simplification.
//!
//! Reduces a net balance map to a small list of transfers that settles it:
//! repeatedly match the largest creditor with the largest debtor and move
//! the smaller of the two amounts. Every step retires at least one party,
//! so a group of `n` non-zero balances settles in at most `n - 1`
//! transfers.
//!
//! Balances within [`EPSILON_MINOR`] of zero count as settled; ties are
//! broken by user id so the output is deterministic for a given input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Currency, balance::BalanceMap};

/// Residuals at or below this many minor units are forgiven.
pub const EPSILON_MINOR: i64 = 1;

/// One transfer in a settlement plan: `from` pays `to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedDebt {
    pub from: String,
    pub to: String,
    pub amount_minor: i64,
}

/// Settlement plan for one currency's balances.
pub fn simplify(per_user: &BTreeMap<String, i64>) -> Vec<SimplifiedDebt> {
    let mut creditors: Vec<(&str, i64)> = per_user
        .iter()
        .filter(|(_, balance)| **balance > EPSILON_MINOR)
        .map(|(user_id, balance)| (user_id.as_str(), *balance))
        .collect();
    let mut debtors: Vec<(&str, i64)> = per_user
        .iter()
        .filter(|(_, balance)| **balance < -EPSILON_MINOR)
        .map(|(user_id, balance)| (user_id.as_str(), -*balance))
        .collect();

    // Largest amount first, user id as tie-break.
    creditors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    debtors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let mut transfers = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < creditors.len() && j < debtors.len() {
        let amount = creditors[i].1.min(debtors[j].1);
        transfers.push(SimplifiedDebt {
            from: debtors[j].0.to_string(),
            to: creditors[i].0.to_string(),
            amount_minor: amount,
        });
        creditors[i].1 -= amount;
        debtors[j].1 -= amount;
        if creditors[i].1 <= EPSILON_MINOR {
            i += 1;
        }
        if debtors[j].1 <= EPSILON_MINOR {
            j += 1;
        }
    }
    transfers
}

/// [`simplify`] applied per currency; settled currencies are omitted.
pub fn simplify_all(balances: &BalanceMap) -> BTreeMap<Currency, Vec<SimplifiedDebt>> {
    balances
        .iter()
        .filter_map(|(currency, per_user)| {
            let transfers = simplify(per_user);
            (!transfers.is_empty()).then_some((*currency, transfers))
        })
        .collect()
}
