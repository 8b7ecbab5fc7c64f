//! Expense primitives.
//!
//! An `Expense` records that one member paid an amount on behalf of the
//! participants listed in its splits. Participants are exactly the split
//! user set; the payer must appear among them.
//!
//! Validation happens on construction and again before every write:
//! - `amount_minor > 0`
//! - at least one split, every split amount `>= 0`, no duplicate users
//! - `paid_by` appears in the splits
//! - split amounts sum to the total within a 1 minor-unit tolerance
//!
//! The tolerance exists for rounded splits (100.00 over three people); the
//! remainder is absorbed on the payer's credit side so per-entry balance
//! deltas still sum to zero exactly.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, EngineError, MoneyCents, ResultEngine, expense_splits::Split};

/// Largest allowed gap between an expense total and the sum of its splits,
/// in minor units.
pub const SPLIT_TOLERANCE_MINOR: i64 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub group_id: String,
    pub currency: Currency,
    pub amount_minor: i64,
    pub paid_by: String,
    pub splits: Vec<Split>,
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub idempotency_key: Option<String>,
}

impl Expense {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group_id: String,
        currency: Currency,
        amount_minor: i64,
        paid_by: String,
        splits: Vec<Split>,
        note: Option<String>,
        created_by: String,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        let expense = Self {
            id: Uuid::new_v4(),
            group_id,
            currency,
            amount_minor,
            paid_by,
            splits,
            note,
            created_by,
            created_at,
            updated_at: created_at,
            deleted_at: None,
            deleted_by: None,
            idempotency_key: None,
        };
        expense.validate()?;
        Ok(expense)
    }

    /// Checks the structural invariants; every write path calls this.
    pub fn validate(&self) -> ResultEngine<()> {
        if !MoneyCents::new(self.amount_minor).is_positive() {
            return Err(EngineError::MalformedEntry(
                "amount_minor must be > 0".to_string(),
            ));
        }
        if self.splits.is_empty() {
            return Err(EngineError::MalformedEntry(
                "an expense needs at least one split".to_string(),
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut sum = MoneyCents::ZERO;
        for split in &self.splits {
            if MoneyCents::new(split.amount_minor).is_negative() {
                return Err(EngineError::MalformedEntry(format!(
                    "negative split for \"{}\"",
                    split.user_id
                )));
            }
            if !seen.insert(split.user_id.as_str()) {
                return Err(EngineError::MalformedEntry(format!(
                    "duplicate split for \"{}\"",
                    split.user_id
                )));
            }
            sum = sum
                .checked_add(MoneyCents::new(split.amount_minor))
                .ok_or_else(|| {
                    EngineError::MalformedEntry("split amounts overflow".to_string())
                })?;
        }

        if !seen.contains(self.paid_by.as_str()) {
            return Err(EngineError::MalformedEntry(format!(
                "payer \"{}\" is not a participant",
                self.paid_by
            )));
        }
        let gap = sum
            .checked_sub(MoneyCents::new(self.amount_minor))
            .ok_or_else(|| EngineError::MalformedEntry("split amounts overflow".to_string()))?;
        if gap.cents().abs() > SPLIT_TOLERANCE_MINOR {
            return Err(EngineError::MalformedEntry(format!(
                "splits sum to {sum}, expected {} (±{SPLIT_TOLERANCE_MINOR})",
                MoneyCents::new(self.amount_minor)
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub group_id: String,
    pub currency: String,
    pub amount_minor: i64,
    pub paid_by: String,
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub deleted_at: Option<DateTimeUtc>,
    pub deleted_by: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::expense_splits::Entity")]
    Splits,
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Groups,
}

impl Related<super::expense_splits::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Splits.def()
    }
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Expense> for ActiveModel {
    fn from(expense: &Expense) -> Self {
        Self {
            id: ActiveValue::Set(expense.id.to_string()),
            group_id: ActiveValue::Set(expense.group_id.clone()),
            currency: ActiveValue::Set(expense.currency.code().to_string()),
            amount_minor: ActiveValue::Set(expense.amount_minor),
            paid_by: ActiveValue::Set(expense.paid_by.clone()),
            note: ActiveValue::Set(expense.note.clone()),
            created_by: ActiveValue::Set(expense.created_by.clone()),
            created_at: ActiveValue::Set(expense.created_at),
            updated_at: ActiveValue::Set(expense.updated_at),
            deleted_at: ActiveValue::Set(expense.deleted_at),
            deleted_by: ActiveValue::Set(expense.deleted_by.clone()),
            idempotency_key: ActiveValue::Set(expense.idempotency_key.clone()),
        }
    }
}

impl TryFrom<Model> for Expense {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::KeyNotFound("expense not exists".to_string()))?,
            group_id: model.group_id,
            currency: Currency::try_from(model.currency.as_str())?,
            amount_minor: model.amount_minor,
            paid_by: model.paid_by,
            // Splits live in their own table; ops attach them after the load.
            splits: Vec::new(),
            note: model.note,
            created_by: model.created_by,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
            deleted_by: model.deleted_by,
            idempotency_key: model.idempotency_key,
        })
    }
}
