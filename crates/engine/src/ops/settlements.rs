use chrono::{DateTime, Utc};
use sea_orm::{DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    AddSettlementCmd, EngineError, LedgerEntry, RemoveSettlementCmd, ResultEngine, Settlement,
    entry::EntryMutation, settlements,
};

use super::{Engine, normalize_optional_text, with_retry_tx, with_tx};

/// Filters for listing settlements.
///
/// `from` is inclusive and `to` is exclusive (`[from, to)`), both in UTC
/// and applied to `created_at`.
#[derive(Clone, Debug, Default)]
pub struct SettlementListFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// If present, only settlements paid by this user.
    pub payer_id: Option<String>,
    /// If true, includes soft-deleted settlements (default: false).
    pub include_deleted: bool,
}

impl Engine {
    /// Records a settlement and folds it into the group snapshot, both in
    /// one transaction. Idempotency keys behave as in
    /// [`Engine::add_expense`].
    #[instrument(skip(self, cmd), fields(group_id = %cmd.group_id, user_id = %cmd.user_id))]
    pub async fn add_settlement(&self, cmd: AddSettlementCmd) -> ResultEngine<Uuid> {
        let mut settlement = Settlement::new(
            cmd.group_id.clone(),
            cmd.currency,
            cmd.amount_minor,
            cmd.payer_id.clone(),
            cmd.payee_id.clone(),
            normalize_optional_text(cmd.note.as_deref()),
            cmd.user_id.clone(),
            cmd.created_at,
        )?;
        settlement.idempotency_key = cmd.idempotency_key.clone();
        let entry = LedgerEntry::Settlement(settlement.clone());

        with_retry_tx!(self, |db_tx| {
            self.require_group_write(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            // Snapshot read precedes every write in the transaction.
            let snap = self.load_snapshot(&db_tx, &cmd.group_id).await?;
            self.require_group_member(&db_tx, &cmd.group_id, &settlement.payer_id)
                .await?;
            self.require_group_member(&db_tx, &cmd.group_id, &settlement.payee_id)
                .await?;

            if let Some(key) = settlement.idempotency_key.as_deref() {
                let existing = settlements::Entity::find()
                    .filter(settlements::Column::GroupId.eq(cmd.group_id.clone()))
                    .filter(settlements::Column::CreatedBy.eq(cmd.user_id.clone()))
                    .filter(settlements::Column::IdempotencyKey.eq(key.to_string()))
                    .one(&db_tx)
                    .await?;
                if let Some(existing) = existing {
                    return Ok(Uuid::parse_str(&existing.id).map_err(|_| {
                        EngineError::KeyNotFound("settlement not exists".to_string())
                    })?);
                }
            }

            settlements::ActiveModel::from(&settlement)
                .insert(&db_tx)
                .await?;
            self.apply_entry_mutation(&db_tx, snap, EntryMutation::Create(&entry), cmd.created_at)
                .await?;
            Ok(settlement.id)
        })
    }

    /// Soft-deletes a settlement and reverses its effect on the snapshot.
    #[instrument(skip(self, cmd), fields(group_id = %cmd.group_id, settlement_id = %cmd.settlement_id))]
    pub async fn remove_settlement(&self, cmd: RemoveSettlementCmd) -> ResultEngine<()> {
        with_retry_tx!(self, |db_tx| {
            self.require_group_write(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            let snap = self.load_snapshot(&db_tx, &cmd.group_id).await?;

            let old = self
                .require_live_settlement(&db_tx, &cmd.group_id, cmd.settlement_id)
                .await?;

            let mut deleted = old.clone();
            deleted.deleted_at = Some(cmd.deleted_at);
            deleted.deleted_by = Some(cmd.user_id.clone());
            deleted.updated_at = cmd.deleted_at;
            settlements::ActiveModel::from(&deleted)
                .update(&db_tx)
                .await?;

            let old_entry = LedgerEntry::Settlement(old);
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

    /// Lists a group's settlements in creation order.
    pub async fn list_settlements(
        &self,
        group_id: &str,
        user_id: &str,
        filter: &SettlementListFilter,
    ) -> ResultEngine<Vec<Settlement>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && from >= to
        {
            return Err(EngineError::InvalidAmount(
                "invalid range: from must be < to".to_string(),
            ));
        }
        with_tx!(self, |db_tx| {
            self.require_group_read(&db_tx, group_id, user_id).await?;

            let mut query = settlements::Entity::find()
                .filter(settlements::Column::GroupId.eq(group_id.to_string()));
            if let Some(from) = filter.from {
                query = query.filter(settlements::Column::CreatedAt.gte(from));
            }
            if let Some(to) = filter.to {
                query = query.filter(settlements::Column::CreatedAt.lt(to));
            }
            if let Some(payer_id) = &filter.payer_id {
                query = query.filter(settlements::Column::PayerId.eq(payer_id.clone()));
            }
            if !filter.include_deleted {
                query = query.filter(settlements::Column::DeletedAt.is_null());
            }

            let models = query
                .order_by_asc(settlements::Column::CreatedAt)
                .order_by_asc(settlements::Column::Id)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Settlement::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    async fn require_live_settlement(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        settlement_id: Uuid,
    ) -> ResultEngine<Settlement> {
        let model = settlements::Entity::find_by_id(settlement_id.to_string())
            .filter(settlements::Column::GroupId.eq(group_id.to_string()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("settlement not exists".to_string()))?;
        if model.deleted_at.is_some() {
            return Err(EngineError::KeyNotFound("settlement not exists".to_string()));
        }
        Settlement::try_from(model)
    }
}
