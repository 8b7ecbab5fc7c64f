use sea_orm::{DatabaseTransaction, prelude::*};

use crate::{EngineError, ResultEngine, group_memberships, groups, users};

use super::Engine;

/// What a member may do inside a group. Access failures surface as
/// `KeyNotFound` so callers cannot distinguish "no such group" from "not
/// yours".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipRole {
    Owner,
    Editor,
    Viewer,
}

impl MembershipRole {
    pub fn can_write(self) -> bool {
        matches!(self, Self::Owner | Self::Editor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }
}

impl TryFrom<&str> for MembershipRole {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            other => Err(EngineError::InvalidRole(format!(
                "invalid membership role: {other}"
            ))),
        }
    }
}

impl Engine {
    async fn find_group_by_id(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
    ) -> ResultEngine<Option<groups::Model>> {
        groups::Entity::find_by_id(group_id.to_string())
            .one(db)
            .await
            .map_err(Into::into)
    }

    pub(super) async fn group_membership_role(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<Option<MembershipRole>> {
        let row =
            group_memberships::Entity::find_by_id((group_id.to_string(), user_id.to_string()))
                .one(db)
                .await?;
        row.as_ref()
            .map(|m| MembershipRole::try_from(m.role.as_str()))
            .transpose()
    }

    pub(super) async fn require_group_read(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<groups::Model> {
        let model = self
            .find_group_by_id(db, group_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("group not exists".to_string()))?;
        if model.owner_id != user_id
            && self
                .group_membership_role(db, group_id, user_id)
                .await?
                .is_none()
        {
            return Err(EngineError::KeyNotFound("group not exists".to_string()));
        }
        Ok(model)
    }

    pub(super) async fn require_group_write(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<groups::Model> {
        let model = self
            .find_group_by_id(db, group_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("group not exists".to_string()))?;
        if model.owner_id == user_id {
            return Ok(model);
        }
        let role = self
            .group_membership_role(db, group_id, user_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("group not exists".to_string()))?;
        if !role.can_write() {
            return Err(EngineError::KeyNotFound("group not exists".to_string()));
        }
        Ok(model)
    }

    pub(super) async fn require_group_owner(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<groups::Model> {
        let model = self
            .find_group_by_id(db, group_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("group not exists".to_string()))?;
        if model.owner_id != user_id {
            return Err(EngineError::KeyNotFound("group not exists".to_string()));
        }
        Ok(model)
    }

    /// Entry participants must belong to the group they appear in.
    pub(super) async fn require_group_member(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        username: &str,
    ) -> ResultEngine<()> {
        if self
            .group_membership_role(db, group_id, username)
            .await?
            .is_none()
        {
            return Err(EngineError::MalformedEntry(format!(
                "\"{username}\" is not a member of the group"
            )));
        }
        Ok(())
    }

    pub(super) async fn require_user_exists(
        &self,
        db: &DatabaseTransaction,
        username: &str,
    ) -> ResultEngine<()> {
        let exists = users::Entity::find_by_id(username.to_string())
            .one(db)
            .await?
            .is_some();
        if !exists {
            return Err(EngineError::KeyNotFound("user not exists".to_string()));
        }
        Ok(())
    }
}
