use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::entities::{OrderStatus, PaymentMethod};
use crate::money;

/// Payload for a "your payment was confirmed" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub user_id: i64,
    pub order_id: i64,
    pub order_number: String,
    pub payment_id: i64,
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub confirmed_at: DateTime<Utc>,
}

/// Payload for a "your order moved to a new status" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub user_id: i64,
    pub order_id: i64,
    pub order_number: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub tracking_code: Option<String>,
}

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Customer-facing notification channel (email in production).
///
/// Calls are fire-and-forget from the engines' point of view: failures are
/// logged by the dispatcher and never affect the operation that caused them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_payment_confirmation(
        &self,
        notice: &PaymentConfirmation,
    ) -> Result<(), NotificationError>;

    async fn send_order_status_change(
        &self,
        notice: &OrderStatusChange,
    ) -> Result<(), NotificationError>;
}

/// Notifier that writes each message to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_payment_confirmation(
        &self,
        notice: &PaymentConfirmation,
    ) -> Result<(), NotificationError> {
        let body = serde_json::to_string(notice)?;
        info!(
            user_id = notice.user_id,
            order_number = %notice.order_number,
            amount = %money::format_brl(notice.amount),
            payload = %body,
            "payment confirmation notice"
        );
        Ok(())
    }

    async fn send_order_status_change(
        &self,
        notice: &OrderStatusChange,
    ) -> Result<(), NotificationError> {
        let body = serde_json::to_string(notice)?;
        info!(
            user_id = notice.user_id,
            order_number = %notice.order_number,
            old_status = %notice.old_status,
            new_status = %notice.new_status,
            payload = %body,
            "order status notice"
        );
        Ok(())
    }
}
