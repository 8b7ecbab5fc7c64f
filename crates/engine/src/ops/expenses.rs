use chrono::{DateTime, Utc};
use sea_orm::{DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    AddExpenseCmd, EngineError, Expense, LedgerEntry, RemoveExpenseCmd, ResultEngine,
    UpdateExpenseCmd, entry::EntryMutation, expense_splits, expenses,
};

use super::{Engine, normalize_optional_text, with_retry_tx, with_tx};

/// Filters for listing expenses.
///
/// `from` is inclusive and `to` is exclusive (`[from, to)`), both in UTC
/// and applied to `created_at`.
#[derive(Clone, Debug, Default)]
pub struct ExpenseListFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// If present, only expenses paid by this user.
    pub paid_by: Option<String>,
    /// If true, includes soft-deleted expenses (default: false).
    pub include_deleted: bool,
}

fn validate_list_filter(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> ResultEngine<()> {
    if let (Some(from), Some(to)) = (from, to)
        && from >= to
    {
        return Err(EngineError::InvalidAmount(
            "invalid range: from must be < to".to_string(),
        ));
    }
    Ok(())
}

impl Engine {
    /// Records an expense and folds it into the group snapshot, both in one
    /// transaction.
    ///
    /// With an idempotency key, a replayed command returns the id of the
    /// already-recorded expense instead of recording it twice.
    #[instrument(skip(self, cmd), fields(group_id = %cmd.group_id, user_id = %cmd.user_id))]
    pub async fn add_expense(&self, cmd: AddExpenseCmd) -> ResultEngine<Uuid> {
        let mut expense = Expense::new(
            cmd.group_id.clone(),
            cmd.currency,
            cmd.amount_minor,
            cmd.paid_by.clone(),
            cmd.splits.clone(),
            normalize_optional_text(cmd.note.as_deref()),
            cmd.user_id.clone(),
            cmd.created_at,
        )?;
        expense.idempotency_key = cmd.idempotency_key.clone();
        let entry = LedgerEntry::Expense(expense.clone());

        with_retry_tx!(self, |db_tx| {
            self.require_group_write(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            // Snapshot read precedes every write in the transaction.
            let snap = self.load_snapshot(&db_tx, &cmd.group_id).await?;
            for split in &expense.splits {
                self.require_group_member(&db_tx, &cmd.group_id, &split.user_id)
                    .await?;
            }

            if let Some(key) = expense.idempotency_key.as_deref() {
                let existing = expenses::Entity::find()
                    .filter(expenses::Column::GroupId.eq(cmd.group_id.clone()))
                    .filter(expenses::Column::CreatedBy.eq(cmd.user_id.clone()))
                    .filter(expenses::Column::IdempotencyKey.eq(key.to_string()))
                    .one(&db_tx)
                    .await?;
                if let Some(existing) = existing {
                    return Ok(Uuid::parse_str(&existing.id).map_err(|_| {
                        EngineError::KeyNotFound("expense not exists".to_string())
                    })?);
                }
            }

            expenses::ActiveModel::from(&expense).insert(&db_tx).await?;
            for split in &expense.splits {
                expense_splits::ActiveModel::from((&expense.id, split))
                    .insert(&db_tx)
                    .await?;
            }

            self.apply_entry_mutation(&db_tx, snap, EntryMutation::Create(&entry), cmd.created_at)
                .await?;
            Ok(expense.id)
        })
    }

    /// Updates an expense, replacing its splits when given, and adjusts the
    /// snapshot by the old-to-new delta.
    ///
    /// Set `expected_updated_at` to refuse the write with `EntryConflict`
    /// when the expense changed since it was read.
    #[instrument(skip(self, cmd), fields(group_id = %cmd.group_id, expense_id = %cmd.expense_id))]
    pub async fn update_expense(&self, cmd: UpdateExpenseCmd) -> ResultEngine<Expense> {
        with_retry_tx!(self, |db_tx| {
            self.require_group_write(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            let snap = self.load_snapshot(&db_tx, &cmd.group_id).await?;

            let old = self
                .require_live_expense(&db_tx, &cmd.group_id, cmd.expense_id)
                .await?;
            if let Some(expected) = cmd.expected_updated_at
                && expected != old.updated_at
            {
                return Err(EngineError::EntryConflict(format!(
                    "expense {} changed at {}, expected {expected}",
                    old.id, old.updated_at
                )));
            }

            let mut new = old.clone();
            if let Some(amount_minor) = cmd.amount_minor {
                new.amount_minor = amount_minor;
            }
            if let Some(currency) = cmd.currency {
                new.currency = currency;
            }
            if let Some(paid_by) = &cmd.paid_by {
                new.paid_by = paid_by.clone();
            }
            if let Some(splits) = &cmd.splits {
                new.splits = splits.clone();
            }
            if let Some(note) = cmd.note.as_deref() {
                new.note = normalize_optional_text(Some(note));
            }
            new.updated_at = cmd.updated_at;
            new.validate()?;

            for split in &new.splits {
                self.require_group_member(&db_tx, &cmd.group_id, &split.user_id)
                    .await?;
            }

            expenses::ActiveModel::from(&new).update(&db_tx).await?;
            expense_splits::Entity::delete_many()
                .filter(expense_splits::Column::ExpenseId.eq(new.id.to_string()))
                .exec(&db_tx)
                .await?;
            for split in &new.splits {
                expense_splits::ActiveModel::from((&new.id, split))
                    .insert(&db_tx)
                    .await?;
            }

            let old_entry = LedgerEntry::Expense(old);
            let new_entry = LedgerEntry::Expense(new.clone());
            self.apply_entry_mutation(
                &db_tx,
                snap,
                EntryMutation::Update {
                    old: &old_entry,
                    new: &new_entry,
                },
                cmd.updated_at,
            )
            .await?;
            Ok(new)
        })
    }

    /// Soft-deletes an expense and reverses its effect on the snapshot.
    #[instrument(skip(self, cmd), fields(group_id = %cmd.group_id, expense_id = %cmd.expense_id))]
    pub async fn remove_expense(&self, cmd: RemoveExpenseCmd) -> ResultEngine<()> {
        with_retry_tx!(self, |db_tx| {
            self.require_group_write(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            let snap = self.load_snapshot(&db_tx, &cmd.group_id).await?;

            let old = self
                .require_live_expense(&db_tx, &cmd.group_id, cmd.expense_id)
                .await?;
            if let Some(expected) = cmd.expected_updated_at
                && expected != old.updated_at
            {
                return Err(EngineError::EntryConflict(format!(
                    "expense {} changed at {}, expected {expected}",
                    old.id, old.updated_at
                )));
            }

            let mut deleted = old.clone();
            deleted.deleted_at = Some(cmd.deleted_at);
            deleted.deleted_by = Some(cmd.user_id.clone());
            deleted.updated_at = cmd.deleted_at;
            expenses::ActiveModel::from(&deleted).update(&db_tx).await?;

            let old_entry = LedgerEntry::Expense(old);
            self.apply_entry_mutation(
                &db_tx,
                snap,
                EntryMutation::Delete(&old_entry),
                cmd.deleted_at,
            )
            .await?;
            Ok(())
        })
    }

    /// Lists a group's expenses in creation order, splits attached.
    pub async fn list_expenses(
        &self,
        group_id: &str,
        user_id: &str,
        filter: &ExpenseListFilter,
    ) -> ResultEngine<Vec<Expense>> {
        validate_list_filter(filter.from, filter.to)?;
        with_tx!(self, |db_tx| {
            self.require_group_read(&db_tx, group_id, user_id).await?;

            let mut query = expenses::Entity::find()
                .filter(expenses::Column::GroupId.eq(group_id.to_string()));
            if let Some(from) = filter.from {
                query = query.filter(expenses::Column::CreatedAt.gte(from));
            }
            if let Some(to) = filter.to {
                query = query.filter(expenses::Column::CreatedAt.lt(to));
            }
            if let Some(paid_by) = &filter.paid_by {
                query = query.filter(expenses::Column::PaidBy.eq(paid_by.clone()));
            }
            if !filter.include_deleted {
                query = query.filter(expenses::Column::DeletedAt.is_null());
            }

            let models = query
                .order_by_asc(expenses::Column::CreatedAt)
                .order_by_asc(expenses::Column::Id)
                .all(&db_tx)
                .await?;

            let mut out = Vec::with_capacity(models.len());
            for model in models {
                out.push(self.attach_splits(&db_tx, Expense::try_from(model)?).await?);
            }
            Ok(out)
        })
    }

    /// Loads a non-deleted expense of the group, splits attached.
    async fn require_live_expense(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        expense_id: Uuid,
    ) -> ResultEngine<Expense> {
        let model = expenses::Entity::find_by_id(expense_id.to_string())
            .filter(expenses::Column::GroupId.eq(group_id.to_string()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("expense not exists".to_string()))?;
        if model.deleted_at.is_some() {
            return Err(EngineError::KeyNotFound("expense not exists".to_string()));
        }
        self.attach_splits(db_tx, Expense::try_from(model)?).await
    }
}
