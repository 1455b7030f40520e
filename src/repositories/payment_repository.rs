use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TryIntoModel,
};

use crate::entities::payment::{
    ActiveModel as PaymentActiveModel, Column, Entity as Payment, Model as PaymentModel,
    PaymentStatus,
};
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;

use super::active_id;

/// Repository for payment attempts
#[derive(Debug, Default, Clone, Copy)]
pub struct PaymentRepository;

impl PaymentRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(Payment::find_by_id(id).one(conn).await?)
    }

    /// Load a payment or fail with `NotFound`
    pub async fn get<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> Result<PaymentModel, ServiceError> {
        self.find_by_id(conn, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", id))
    }

    pub async fn find_by_transaction_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::TransactionId.eq(transaction_id))
            .one(conn)
            .await?)
    }

    pub async fn find_by_gateway_transaction_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::GatewayTransactionId.eq(gateway_transaction_id))
            .one(conn)
            .await?)
    }

    /// Insert without mapping the error, so callers can detect unique
    /// violations on the transaction id.
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment: PaymentActiveModel,
    ) -> Result<PaymentModel, sea_orm::DbErr> {
        payment.insert(conn).await
    }

    /// Writes `changes` only if the row is still at `expected_version`,
    /// bumping the version on success.
    pub async fn update_versioned<C: ConnectionTrait>(
        &self,
        conn: &C,
        mut changes: PaymentActiveModel,
        expected_version: i32,
    ) -> Result<PaymentModel, ServiceError> {
        let id = active_id(&changes.id)
            .ok_or_else(|| ServiceError::InternalError("payment update without id".into()))?;
        changes.version = Set(expected_version + 1);

        let result = Payment::update_many()
            .set(changes.clone())
            .filter(Column::Id.eq(id))
            .filter(Column::Version.eq(expected_version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::stale("Payment", id, expected_version));
        }
        Ok(changes.try_into_model()?)
    }

    pub async fn delete<C: ConnectionTrait>(&self, conn: &C, id: i64) -> Result<u64, ServiceError> {
        Ok(Payment::delete_by_id(id).exec(conn).await?.rows_affected)
    }

    /// Payments of an order, newest first
    pub async fn find_by_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: i64,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::OrderId.eq(order_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(conn)
            .await?)
    }

    /// Payments of several orders, newest first
    pub async fn find_by_orders<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_ids: &[i64],
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(Payment::find()
            .filter(Column::OrderId.is_in(order_ids.iter().copied()))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(conn)
            .await?)
    }

    /// Successful payments of an order, most recently confirmed first
    pub async fn find_successful_by_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: i64,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::OrderId.eq(order_id))
            .filter(Column::Status.is_in(PaymentStatus::SUCCESSFUL_STATUSES))
            .order_by_desc(Column::ConfirmedAt)
            .order_by_desc(Column::Id)
            .all(conn)
            .await?)
    }

    /// In-progress payments whose deadline passed before `now`
    pub async fn find_expired<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::Status.is_in(PaymentStatus::IN_PROGRESS_STATUSES))
            .filter(Column::ExpiresAt.is_not_null())
            .filter(Column::ExpiresAt.lt(now))
            .order_by_asc(Column::ExpiresAt)
            .all(conn)
            .await?)
    }

    pub async fn find_by_methods_and_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        methods: &[PaymentMethod],
        status: PaymentStatus,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::PaymentMethod.is_in(methods.iter().copied()))
            .filter(Column::Status.eq(status))
            .order_by_asc(Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Payments created inside `[start, end)`
    pub async fn find_created_between<C: ConnectionTrait>(
        &self,
        conn: &C,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(Column::CreatedAt.gte(start))
            .filter(Column::CreatedAt.lt(end))
            .order_by_asc(Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Substring match on the transaction id, gateway transaction id or
    /// gateway reference
    pub async fn search_by_reference<C: ConnectionTrait>(
        &self,
        conn: &C,
        term: &str,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(
                Condition::any()
                    .add(Column::TransactionId.contains(term))
                    .add(Column::GatewayTransactionId.contains(term))
                    .add(Column::GatewayReference.contains(term)),
            )
            .order_by_desc(Column::CreatedAt)
            .all(conn)
            .await?)
    }
}
