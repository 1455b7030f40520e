//! Explicit loaders for orders, order items and payments.
//!
//! Repositories hold no connection of their own: every method takes the
//! connection or transaction to run on, so the engines decide where the
//! transaction boundary is. Writes to versioned rows go through
//! `update_versioned`, which rejects the write with `Conflict` when the row
//! changed since it was read.

use sea_orm::{ActiveValue, DbErr, SqlErr};

pub mod order_repository;
pub mod payment_repository;

pub use order_repository::OrderRepository;
pub use payment_repository::PaymentRepository;

/// Primary key of an active model built from a loaded row.
pub(crate) fn active_id(id: &ActiveValue<i64>) -> Option<i64> {
    match id {
        ActiveValue::Set(id) | ActiveValue::Unchanged(id) => Some(*id),
        ActiveValue::NotSet => None,
    }
}

/// True when the insert failed on a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
