//! Settlement primitives.
//!
//! A `Settlement` records a direct repayment: the payer hands money to the
//! payee outside any expense. Its balance effect is the payer moving toward
//! zero and the payee moving away from credit.
//!
//! Settlements are not editable; correcting one means removing it and
//! recording a new one.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, EngineError, MoneyCents, ResultEngine};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub group_id: String,
    pub currency: Currency,
    pub amount_minor: i64,
    pub payer_id: String,
    pub payee_id: String,
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub idempotency_key: Option<String>,
}

impl Settlement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group_id: String,
        currency: Currency,
        amount_minor: i64,
        payer_id: String,
        payee_id: String,
        note: Option<String>,
        created_by: String,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if !MoneyCents::new(amount_minor).is_positive() {
            return Err(EngineError::MalformedEntry(
                "amount_minor must be > 0".to_string(),
            ));
        }
        if payer_id == payee_id {
            return Err(EngineError::MalformedEntry(
                "payer and payee must differ".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            group_id,
            currency,
            amount_minor,
            payer_id,
            payee_id,
            note,
            created_by,
            created_at,
            updated_at: created_at,
            deleted_at: None,
            deleted_by: None,
            idempotency_key: None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "settlements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub group_id: String,
    pub currency: String,
    pub amount_minor: i64,
    pub payer_id: String,
    pub payee_id: String,
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
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Groups,
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Settlement> for ActiveModel {
    fn from(settlement: &Settlement) -> Self {
        Self {
            id: ActiveValue::Set(settlement.id.to_string()),
            group_id: ActiveValue::Set(settlement.group_id.clone()),
            currency: ActiveValue::Set(settlement.currency.code().to_string()),
            amount_minor: ActiveValue::Set(settlement.amount_minor),
            payer_id: ActiveValue::Set(settlement.payer_id.clone()),
            payee_id: ActiveValue::Set(settlement.payee_id.clone()),
            note: ActiveValue::Set(settlement.note.clone()),
            created_by: ActiveValue::Set(settlement.created_by.clone()),
            created_at: ActiveValue::Set(settlement.created_at),
            updated_at: ActiveValue::Set(settlement.updated_at),
            deleted_at: ActiveValue::Set(settlement.deleted_at),
            deleted_by: ActiveValue::Set(settlement.deleted_by.clone()),
            idempotency_key: ActiveValue::Set(settlement.idempotency_key.clone()),
        }
    }
}

impl TryFrom<Model> for Settlement {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::KeyNotFound("settlement not exists".to_string()))?,
            group_id: model.group_id,
            currency: Currency::try_from(model.currency.as_str())?,
            amount_minor: model.amount_minor,
            payer_id: model.payer_id,
            payee_id: model.payee_id,
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
