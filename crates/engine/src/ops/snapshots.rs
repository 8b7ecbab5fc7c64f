//! Snapshot maintenance.
//!
//! Every mutation reads the stored snapshot via [`Engine::load_snapshot`]
//! before its first write, then funnels the result through
//! [`Engine::apply_entry_mutation`] inside the same transaction. The write
//! is guarded by a version check: if another transaction bumped the
//! snapshot after the read, the update touches zero rows and the caller's
//! retry loop re-runs the whole transaction against fresh state.

use chrono::{DateTime, Utc};
use sea_orm::{
    DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr,
};
use tracing::instrument;

use crate::{
    BalanceSnapshot, EngineError, Expense, LedgerEntry, ResultEngine, Settlement,
    entry::EntryMutation, expense_splits, expenses, settlements, snapshot,
};

use super::{Engine, with_tx};

impl Engine {
    /// Folds one entry mutation into `snap`, a snapshot the caller read at
    /// the top of the transaction, and persists the result with an
    /// optimistic version check.
    ///
    /// Taking the pre-read snapshot keeps the read ahead of every write in
    /// the transaction. It never opens its own transaction, so the entry
    /// write and the snapshot write commit or roll back together.
    pub(super) async fn apply_entry_mutation(
        &self,
        db_tx: &DatabaseTransaction,
        mut snap: BalanceSnapshot,
        mutation: EntryMutation<'_>,
        now: DateTime<Utc>,
    ) -> ResultEngine<BalanceSnapshot> {
        let group_id = mutation.group_id().to_string();
        let expected_version = snap.version;
        snap.apply_mutation(&mutation, now);

        let result = snapshot::Entity::update_many()
            .col_expr(snapshot::Column::Version, Expr::value(snap.version))
            .col_expr(snapshot::Column::Document, Expr::value(snap.document()?))
            .col_expr(
                snapshot::Column::LastUpdated,
                Expr::value(snap.last_updated),
            )
            .filter(snapshot::Column::GroupId.eq(group_id.clone()))
            .filter(snapshot::Column::Version.eq(expected_version))
            .exec(db_tx)
            .await?;
        if result.rows_affected == 0 {
            return Err(EngineError::SnapshotConflict(format!(
                "group {group_id}: version {expected_version} was superseded"
            )));
        }

        Ok(snap)
    }

    /// Returns the group's maintained snapshot, after checking its zero-sum
    /// invariant. A failed check surfaces as `CorruptSnapshot`; run
    /// [`Engine::recompute_snapshot`] to repair.
    pub async fn snapshot(&self, group_id: &str, user_id: &str) -> ResultEngine<BalanceSnapshot> {
        with_tx!(self, |db_tx| {
            self.require_group_read(&db_tx, group_id, user_id).await?;
            let snap = self.load_snapshot(&db_tx, group_id).await?;
            snap.verify()?;
            Ok(snap)
        })
    }

    /// Rebuilds the snapshot from the group's live entries and stores it
    /// with a bumped version. This is the repair path for a corrupt
    /// snapshot and the oracle the incremental path must agree with.
    #[instrument(skip(self))]
    pub async fn recompute_snapshot(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<BalanceSnapshot> {
        with_tx!(self, |db_tx| {
            self.require_group_write(&db_tx, group_id, user_id).await?;

            let stored = self.load_snapshot(&db_tx, group_id).await?;
            let entries = self.load_live_entries(&db_tx, group_id).await?;
            let rebuilt =
                BalanceSnapshot::rebuild(group_id, &entries, stored.version + 1, Utc::now());

            snapshot::ActiveModel::try_from(&rebuilt)?.update(&db_tx).await?;
            Ok(rebuilt)
        })
    }

    /// Reads the group's stored snapshot. Mutations call this before any
    /// write in the transaction; the version it carries is the one
    /// [`Engine::apply_entry_mutation`] later checks against.
    pub(super) async fn load_snapshot(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
    ) -> ResultEngine<BalanceSnapshot> {
        let model = snapshot::Entity::find_by_id(group_id.to_string())
            .one(db_tx)
            .await?
            .ok_or_else(|| {
                EngineError::CorruptSnapshot(format!("no snapshot row for group {group_id}"))
            })?;
        BalanceSnapshot::try_from(model)
    }

    /// All non-deleted entries of a group, expenses first, in creation
    /// order.
    pub(super) async fn load_live_entries(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        let expense_models = expenses::Entity::find()
            .filter(expenses::Column::GroupId.eq(group_id.to_string()))
            .filter(expenses::Column::DeletedAt.is_null())
            .order_by_asc(expenses::Column::CreatedAt)
            .order_by_asc(expenses::Column::Id)
            .all(db_tx)
            .await?;

        let mut entries = Vec::with_capacity(expense_models.len());
        for model in expense_models {
            let expense = self.attach_splits(db_tx, Expense::try_from(model)?).await?;
            entries.push(LedgerEntry::Expense(expense));
        }

        let settlement_models = settlements::Entity::find()
            .filter(settlements::Column::GroupId.eq(group_id.to_string()))
            .filter(settlements::Column::DeletedAt.is_null())
            .order_by_asc(settlements::Column::CreatedAt)
            .order_by_asc(settlements::Column::Id)
            .all(db_tx)
            .await?;
        for model in settlement_models {
            entries.push(LedgerEntry::Settlement(Settlement::try_from(model)?));
        }

        Ok(entries)
    }

    pub(super) async fn attach_splits(
        &self,
        db_tx: &DatabaseTransaction,
        mut expense: Expense,
    ) -> ResultEngine<Expense> {
        let rows = expense_splits::Entity::find()
            .filter(expense_splits::Column::ExpenseId.eq(expense.id.to_string()))
            .order_by_asc(expense_splits::Column::UserId)
            .all(db_tx)
            .await?;
        expense.splits = rows
            .into_iter()
            .map(crate::Split::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(expense)
    }
}
