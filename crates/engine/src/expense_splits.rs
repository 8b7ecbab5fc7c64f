//! Expense splits.
//!
//! A [`Split`] is one participant's share of an
//! [`Expense`](crate::Expense). Amounts are non-negative integer **minor
//! units**; a zero-amount split records a participant with no share.
//!
//! Split rows are immutable per expense version: updating an expense
//! replaces its split rows wholesale.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EngineError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub user_id: String,
    pub amount_minor: i64,
}

impl Split {
    pub fn new(user_id: &str, amount_minor: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            amount_minor,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expense_splits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub expense_id: String,
    pub user_id: String,
    pub amount_minor: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::expenses::Entity",
        from = "Column::ExpenseId",
        to = "super::expenses::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Expenses,
}

impl Related<super::expenses::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Expenses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<(&Uuid, &Split)> for ActiveModel {
    fn from((expense_id, split): (&Uuid, &Split)) -> Self {
        Self {
            id: ActiveValue::Set(Uuid::new_v4().to_string()),
            expense_id: ActiveValue::Set(expense_id.to_string()),
            user_id: ActiveValue::Set(split.user_id.clone()),
            amount_minor: ActiveValue::Set(split.amount_minor),
        }
    }
}

impl TryFrom<Model> for Split {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: model.user_id,
            amount_minor: model.amount_minor,
        })
    }
}
