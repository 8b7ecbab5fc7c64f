//! Command structs for engine operations.
//!
//! These types group parameters for write operations (group/expense/
//! settlement), keeping call sites readable and avoiding long argument
//! lists. Timestamps are passed in by the caller so replays and tests are
//! reproducible.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Currency, Split};

/// Create a group owned by `owner_id`.
#[derive(Clone, Debug)]
pub struct CreateGroupCmd {
    pub name: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl CreateGroupCmd {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        owner_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            owner_id: owner_id.into(),
            created_at,
        }
    }
}

/// Record an expense in a group.
#[derive(Clone, Debug)]
pub struct AddExpenseCmd {
    pub group_id: String,
    pub user_id: String,
    pub currency: Currency,
    pub amount_minor: i64,
    pub paid_by: String,
    pub splits: Vec<Split>,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AddExpenseCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        currency: Currency,
        amount_minor: i64,
        paid_by: impl Into<String>,
        splits: Vec<Split>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            user_id: user_id.into(),
            currency,
            amount_minor,
            paid_by: paid_by.into(),
            splits,
            note: None,
            idempotency_key: None,
            created_at,
        }
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Update an existing expense. Unset fields keep their current value;
/// `splits` is replaced wholesale when given.
///
/// `expected_updated_at` is the optimistic entry lock: when set, the write
/// is refused with `EntryConflict` if the stored row was modified since.
#[derive(Clone, Debug)]
pub struct UpdateExpenseCmd {
    pub group_id: String,
    pub expense_id: Uuid,
    pub user_id: String,
    pub amount_minor: Option<i64>,
    pub currency: Option<Currency>,
    pub paid_by: Option<String>,
    pub splits: Option<Vec<Split>>,
    pub note: Option<String>,
    pub expected_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateExpenseCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        expense_id: Uuid,
        user_id: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            expense_id,
            user_id: user_id.into(),
            amount_minor: None,
            currency: None,
            paid_by: None,
            splits: None,
            note: None,
            expected_updated_at: None,
            updated_at,
        }
    }

    #[must_use]
    pub fn amount_minor(mut self, amount_minor: i64) -> Self {
        self.amount_minor = Some(amount_minor);
        self
    }

    #[must_use]
    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    #[must_use]
    pub fn paid_by(mut self, paid_by: impl Into<String>) -> Self {
        self.paid_by = Some(paid_by.into());
        self
    }

    #[must_use]
    pub fn splits(mut self, splits: Vec<Split>) -> Self {
        self.splits = Some(splits);
        self
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn expected_updated_at(mut self, expected: DateTime<Utc>) -> Self {
        self.expected_updated_at = Some(expected);
        self
    }
}

/// Soft-delete an expense.
#[derive(Clone, Debug)]
pub struct RemoveExpenseCmd {
    pub group_id: String,
    pub expense_id: Uuid,
    pub user_id: String,
    pub expected_updated_at: Option<DateTime<Utc>>,
    pub deleted_at: DateTime<Utc>,
}

impl RemoveExpenseCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        expense_id: Uuid,
        user_id: impl Into<String>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            expense_id,
            user_id: user_id.into(),
            expected_updated_at: None,
            deleted_at,
        }
    }

    #[must_use]
    pub fn expected_updated_at(mut self, expected: DateTime<Utc>) -> Self {
        self.expected_updated_at = Some(expected);
        self
    }
}

/// Record a settlement (direct repayment) in a group.
#[derive(Clone, Debug)]
pub struct AddSettlementCmd {
    pub group_id: String,
    pub user_id: String,
    pub currency: Currency,
    pub amount_minor: i64,
    pub payer_id: String,
    pub payee_id: String,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AddSettlementCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        currency: Currency,
        amount_minor: i64,
        payer_id: impl Into<String>,
        payee_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            user_id: user_id.into(),
            currency,
            amount_minor,
            payer_id: payer_id.into(),
            payee_id: payee_id.into(),
            note: None,
            idempotency_key: None,
            created_at,
        }
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Soft-delete a settlement.
#[derive(Clone, Debug)]
pub struct RemoveSettlementCmd {
    pub group_id: String,
    pub settlement_id: Uuid,
    pub user_id: String,
    pub deleted_at: DateTime<Utc>,
}

impl RemoveSettlementCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        settlement_id: Uuid,
        user_id: impl Into<String>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            settlement_id,
            user_id: user_id.into(),
            deleted_at,
        }
    }
}
