use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TryIntoModel,
};

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel,
    OrderStatus,
};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
};
use crate::errors::ServiceError;

use super::active_id;

/// Repository for order headers and their items
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderRepository;

impl OrderRepository {
    pub fn new() -> Self {
        Self
    }

    /// Find an order by ID
    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(conn).await?)
    }

    /// Load an order or fail with `NotFound`
    pub async fn get<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<OrderModel, ServiceError> {
        self.find_by_id(conn, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", id))
    }

    pub async fn find_by_order_number<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_number: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::OrderNumber.eq(order_number))
            .one(conn)
            .await?)
    }

    /// Items of an order in insertion order
    pub async fn items_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: i64,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .all(conn)
            .await?)
    }

    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderActiveModel,
    ) -> Result<OrderModel, ServiceError> {
        Ok(order.insert(conn).await?)
    }

    pub async fn insert_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        item: OrderItemActiveModel,
    ) -> Result<OrderItemModel, ServiceError> {
        Ok(item.insert(conn).await?)
    }

    /// Writes `changes` only if the row is still at `expected_version`,
    /// bumping the version on success.
    pub async fn update_versioned<C: ConnectionTrait>(
        &self,
        conn: &C,
        mut changes: OrderActiveModel,
        expected_version: i32,
    ) -> Result<OrderModel, ServiceError> {
        let id = active_id(&changes.id)
            .ok_or_else(|| ServiceError::InternalError("order update without id".into()))?;
        changes.version = Set(expected_version + 1);

        let result = Order::update_many()
            .set(changes.clone())
            .filter(Column::Id.eq(id))
            .filter(Column::Version.eq(expected_version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::stale("Order", id, expected_version));
        }
        Ok(changes.try_into_model()?)
    }

    /// Orders of a user, newest first
    pub async fn find_by_user<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(conn)
            .await?)
    }

    pub async fn find_by_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        status: OrderStatus,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::Status.eq(status))
            .order_by_desc(Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Orders created at or after `since`, newest first
    pub async fn find_created_since<C: ConnectionTrait>(
        &self,
        conn: &C,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::CreatedAt.gte(since))
            .order_by_desc(Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Orders in `status` created inside `[from, to)`; either bound may be open
    pub async fn find_by_status_between<C: ConnectionTrait>(
        &self,
        conn: &C,
        status: OrderStatus,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = Order::find().filter(Column::Status.eq(status));
        if let Some(from) = from {
            query = query.filter(Column::CreatedAt.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(Column::CreatedAt.lt(to));
        }
        Ok(query.all(conn).await?)
    }

    /// Orders created inside `[from, to)` whose status is not in `excluded`
    pub async fn find_created_between_excluding<C: ConnectionTrait>(
        &self,
        conn: &C,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        excluded: &[OrderStatus],
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::CreatedAt.gte(from))
            .filter(Column::CreatedAt.lt(to))
            .filter(Column::Status.is_not_in(excluded.iter().copied()))
            .all(conn)
            .await?)
    }

    pub async fn count<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ServiceError> {
        Ok(Order::find().count(conn).await?)
    }

    pub async fn count_by_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        status: OrderStatus,
    ) -> Result<u64, ServiceError> {
        Ok(Order::find()
            .filter(Column::Status.eq(status))
            .count(conn)
            .await?)
    }

    pub async fn count_by_user<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
    ) -> Result<u64, ServiceError> {
        Ok(Order::find()
            .filter(Column::UserId.eq(user_id))
            .count(conn)
            .await?)
    }

    /// Ids of all orders belonging to `user_id`
    pub async fn ids_for_user<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
    ) -> Result<Vec<i64>, ServiceError> {
        Ok(self
            .find_by_user(conn, user_id)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect())
    }
}

