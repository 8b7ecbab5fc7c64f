//! Persisted balance snapshots.
//!
//! One row per group holds the group's net balances and settlement plan as
//! a JSON document, plus a monotonically increasing version used for
//! optimistic locking. The snapshot is maintained in the same database
//! transaction as the entry write that changed it, so readers never see a
//! snapshot that disagrees with the entry tables.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    Currency, EngineError, ResultEngine,
    balance::{BalanceMap, merge_deltas, net_balances},
    entry::{EntryMutation, LedgerEntry, entry_deltas},
    simplify::{SimplifiedDebt, simplify_all},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub group_id: String,
    pub version: i64,
    pub balances: BalanceMap,
    pub simplified: BTreeMap<Currency, Vec<SimplifiedDebt>>,
    pub last_updated: DateTime<Utc>,
}

impl BalanceSnapshot {
    /// Snapshot of a group with no entries yet, at version 0.
    pub fn empty(group_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            group_id: group_id.to_string(),
            version: 0,
            balances: BalanceMap::new(),
            simplified: BTreeMap::new(),
            last_updated: now,
        }
    }

    /// Folds one entry mutation into the snapshot and bumps the version.
    ///
    /// An update reverses the old entry's deltas before applying the new
    /// ones, so the result equals a recompute over the mutated entry list.
    pub fn apply_mutation(&mut self, mutation: &EntryMutation<'_>, now: DateTime<Utc>) {
        match mutation {
            EntryMutation::Create(entry) => {
                merge_deltas(&mut self.balances, &entry_deltas(entry), 1);
            }
            EntryMutation::Update { old, new } => {
                merge_deltas(&mut self.balances, &entry_deltas(old), -1);
                merge_deltas(&mut self.balances, &entry_deltas(new), 1);
            }
            EntryMutation::Delete(entry) => {
                merge_deltas(&mut self.balances, &entry_deltas(entry), -1);
            }
        }
        self.simplified = simplify_all(&self.balances);
        self.version += 1;
        self.last_updated = now;
    }

    /// Recomputes a snapshot from scratch over the group's live entries.
    ///
    /// `version` is the version the rebuilt snapshot should carry; the
    /// repair path passes the stored version plus one.
    pub fn rebuild(
        group_id: &str,
        entries: &[LedgerEntry],
        version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let balances = net_balances(entries);
        let simplified = simplify_all(&balances);
        Self {
            group_id: group_id.to_string(),
            version,
            balances,
            simplified,
            last_updated: now,
        }
    }

    /// The JSON document persisted alongside the version column.
    pub fn document(&self) -> ResultEngine<serde_json::Value> {
        serde_json::to_value(SnapshotDocument {
            balances: self.balances.clone(),
            simplified: self.simplified.clone(),
        })
        .map_err(|err| EngineError::CorruptSnapshot(format!("unserializable document: {err}")))
    }

    /// Zero-sum invariant check, run on every read of a stored snapshot.
    pub fn verify(&self) -> ResultEngine<()> {
        for (currency, per_user) in &self.balances {
            let sum: i64 = per_user.values().sum();
            if sum != 0 {
                return Err(EngineError::CorruptSnapshot(format!(
                    "balances for {currency} sum to {sum}, expected 0"
                )));
            }
        }
        Ok(())
    }
}

/// The JSON payload stored in the snapshot row.
#[derive(Serialize, Deserialize)]
struct SnapshotDocument {
    balances: BalanceMap,
    simplified: BTreeMap<Currency, Vec<SimplifiedDebt>>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "balance_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: String,
    pub version: i64,
    pub document: Json,
    pub last_updated: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Groups,
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&BalanceSnapshot> for ActiveModel {
    type Error = EngineError;

    fn try_from(snapshot: &BalanceSnapshot) -> Result<Self, Self::Error> {
        let document = snapshot.document()?;
        Ok(Self {
            group_id: ActiveValue::Set(snapshot.group_id.clone()),
            version: ActiveValue::Set(snapshot.version),
            document: ActiveValue::Set(document),
            last_updated: ActiveValue::Set(snapshot.last_updated),
        })
    }
}

impl TryFrom<Model> for BalanceSnapshot {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let document: SnapshotDocument = serde_json::from_value(model.document)
            .map_err(|err| EngineError::CorruptSnapshot(format!("unreadable document: {err}")))?;
        Ok(Self {
            group_id: model.group_id,
            version: model.version,
            balances: document.balances,
            simplified: document.simplified,
            last_updated: model.last_updated,
        })
    }
}
