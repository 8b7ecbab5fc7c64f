//! Shared-expense ledger engine.
//!
//! Tracks who owes whom inside a group: expenses and settlements are
//! recorded as ledger entries, folded into per-currency net balances, and
//! reduced to a short list of transfers that settles the group.
//!
//! The balances live in a persisted [`BalanceSnapshot`], maintained
//! incrementally in the same database transaction as each entry write and
//! guarded by an optimistic version check. [`Engine::recompute_snapshot`]
//! rebuilds it from the entries when needed; both paths share the same
//! per-entry delta function, so they always agree.
//!
//! All amounts are `i64` minor units (cents). The engine never converts
//! between currencies.

pub use balance::{BalanceMap, net_balances};
pub use commands::{
    AddExpenseCmd, AddSettlementCmd, CreateGroupCmd, RemoveExpenseCmd, RemoveSettlementCmd,
    UpdateExpenseCmd,
};
pub use currency::Currency;
pub use entry::{LedgerEntry, entry_deltas};
pub use error::EngineError;
pub use expense_splits::Split;
pub use expenses::Expense;
pub use groups::Group;
pub use money::MoneyCents;
pub use ops::{
    Engine, EngineBuilder, ExpenseListFilter, MAX_SNAPSHOT_ATTEMPTS, MembershipRole,
    SettlementListFilter,
};
pub use settlements::Settlement;
pub use simplify::{EPSILON_MINOR, SimplifiedDebt, simplify, simplify_all};
pub use snapshot::BalanceSnapshot;

mod balance;
mod commands;
mod currency;
mod entry;
mod error;
mod expense_splits;
mod expenses;
mod group_memberships;
mod groups;
mod money;
mod ops;
mod settlements;
mod simplify;
mod snapshot;
mod users;

type ResultEngine<T> = Result<T, EngineError>;
