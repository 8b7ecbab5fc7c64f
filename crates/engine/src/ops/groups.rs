use sea_orm::{ActiveValue, QueryFilter, TransactionTrait, prelude::*};
use tracing::instrument;

use crate::{
    BalanceSnapshot, CreateGroupCmd, EngineError, Group, ResultEngine, group_memberships, snapshot,
};

use super::{Engine, access::MembershipRole, normalize_required_name, with_tx};

impl Engine {
    /// Creates a group owned by `cmd.owner_id`, with an owner membership and
    /// an empty balance snapshot at version 0.
    #[instrument(skip(self, cmd), fields(owner_id = %cmd.owner_id))]
    pub async fn create_group(&self, cmd: CreateGroupCmd) -> ResultEngine<Group> {
        let name = normalize_required_name(&cmd.name, "group")?;
        with_tx!(self, |db_tx| {
            self.require_user_exists(&db_tx, &cmd.owner_id).await?;

            let group = Group::new(name, &cmd.owner_id, cmd.created_at);
            crate::groups::ActiveModel::from(&group).insert(&db_tx).await?;

            group_memberships::ActiveModel {
                group_id: ActiveValue::Set(group.id.clone()),
                user_id: ActiveValue::Set(cmd.owner_id.clone()),
                role: ActiveValue::Set(MembershipRole::Owner.as_str().to_string()),
            }
            .insert(&db_tx)
            .await?;

            let empty = BalanceSnapshot::empty(&group.id, cmd.created_at);
            snapshot::ActiveModel::try_from(&empty)?.insert(&db_tx).await?;

            Ok(group)
        })
    }

    /// Adds or updates a group member (owner-only).
    #[instrument(skip(self))]
    pub async fn upsert_group_member(
        &self,
        group_id: &str,
        member_username: &str,
        role: &str,
        user_id: &str,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let group = self.require_group_owner(&db_tx, group_id, user_id).await?;
            self.require_user_exists(&db_tx, member_username).await?;

            let parsed = MembershipRole::try_from(role)?;
            if member_username == group.owner_id && parsed != MembershipRole::Owner {
                return Err(EngineError::InvalidRole(
                    "cannot demote group owner".to_string(),
                ));
            }

            let active = group_memberships::ActiveModel {
                group_id: ActiveValue::Set(group.id.clone()),
                user_id: ActiveValue::Set(member_username.to_string()),
                role: ActiveValue::Set(parsed.as_str().to_string()),
            };

            // Upsert: insert if missing, otherwise update role.
            match group_memberships::Entity::find_by_id((
                group.id.clone(),
                member_username.to_string(),
            ))
            .one(&db_tx)
            .await?
            {
                Some(_) => {
                    active.update(&db_tx).await?;
                }
                None => {
                    active.insert(&db_tx).await?;
                }
            }

            Ok(())
        })
    }

    /// Removes a group member (owner-only). Members with recorded entries
    /// stay in the ledger's history; only their access goes away.
    #[instrument(skip(self))]
    pub async fn remove_group_member(
        &self,
        group_id: &str,
        member_username: &str,
        user_id: &str,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let group = self.require_group_owner(&db_tx, group_id, user_id).await?;
            if member_username == group.owner_id {
                return Err(EngineError::InvalidRole(
                    "cannot remove group owner".to_string(),
                ));
            }

            group_memberships::Entity::delete_by_id((
                group.id.clone(),
                member_username.to_string(),
            ))
            .exec(&db_tx)
            .await?;

            Ok(())
        })
    }

    /// Lists group members as `(username, role)` pairs.
    pub async fn list_group_members(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<Vec<(String, String)>> {
        with_tx!(self, |db_tx| {
            let group = self.require_group_read(&db_tx, group_id, user_id).await?;

            let rows = group_memberships::Entity::find()
                .filter(group_memberships::Column::GroupId.eq(group.id.clone()))
                .all(&db_tx)
                .await?;
            Ok(rows.into_iter().map(|m| (m.user_id, m.role)).collect())
        })
    }
}
