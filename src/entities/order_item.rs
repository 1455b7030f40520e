use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

use crate::money;

/// A frozen order line. The product name is not stored; it is resolved
/// through the catalog when the line is displayed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub subtotal: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        // subtotal always follows unit_price * quantity
        if let (Some(unit_price), Some(quantity)) = (
            current(&active_model.unit_price),
            current(&active_model.quantity),
        ) {
            active_model.subtotal = Set(money::line_total(unit_price, quantity));
        }

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(Utc::now());
            }
        }

        Ok(active_model)
    }
}

fn current<V>(value: &ActiveValue<V>) -> Option<V>
where
    V: Into<sea_orm::Value> + Clone,
{
    match value {
        ActiveValue::Set(v) | ActiveValue::Unchanged(v) => Some(v.clone()),
        ActiveValue::NotSet => None,
    }
}

impl Model {
    pub fn line_total(&self) -> Decimal {
        money::line_total(self.unit_price, self.quantity)
    }
}
