use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::payment_method::PaymentMethod;
use crate::errors::ServiceError;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// `ORD-<millis>-<8 hex>`
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: i64,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub shipping_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_confirmed: bool,

    pub shipping_street: String,
    pub shipping_number: String,
    #[sea_orm(nullable)]
    pub shipping_complement: Option<String>,
    pub shipping_neighborhood: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_zip_code: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    #[sea_orm(nullable)]
    pub tracking_code: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub shipped_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Address frozen on the order at checkout.
    pub fn shipping_address(&self) -> ShippingAddress {
        ShippingAddress {
            street: self.shipping_street.clone(),
            number: self.shipping_number.clone(),
            complement: self.shipping_complement.clone(),
            neighborhood: self.shipping_neighborhood.clone(),
            city: self.shipping_city.clone(),
            state: self.shipping_state.clone(),
            zip_code: self.shipping_zip_code.clone(),
        }
    }

    pub fn full_shipping_address(&self) -> String {
        self.shipping_address().formatted()
    }

    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }
}

/// Shipping address snapshot copied onto the order at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200, message = "Street is required"))]
    pub street: String,
    #[validate(length(min = 1, max = 20, message = "Number is required"))]
    pub number: String,
    #[validate(length(max = 100))]
    pub complement: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Neighborhood is required"))]
    pub neighborhood: String,
    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 50, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 1, max = 10, message = "Zip code must be 1-10 characters"))]
    pub zip_code: String,
}

impl ShippingAddress {
    /// `street, number[, complement], neighborhood, city - state, CEP: zip`
    pub fn formatted(&self) -> String {
        let mut out = format!("{}, {}", self.street, self.number);
        if let Some(complement) = self.complement.as_deref().filter(|c| !c.trim().is_empty()) {
            out.push_str(", ");
            out.push_str(complement);
        }
        out.push_str(&format!(
            ", {}, {} - {}, CEP: {}",
            self.neighborhood, self.city, self.state, self.zip_code
        ));
        out
    }
}

/// Order status enumeration.
///
/// Forward path is `PENDING -> CONFIRMED -> PROCESSING -> SHIPPED -> DELIVERED`.
/// Cancellation is only possible from PENDING or CONFIRMED, and a delivered
/// order may later be refunded.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl OrderStatus {
    pub fn next_statuses(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped],
            Shipped => &[Delivered],
            Delivered => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }

    /// Same-status is an allowed no-op.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self == target || self.next_statuses().contains(&target)
    }

    pub fn validate_transition(self, target: OrderStatus) -> Result<(), ServiceError> {
        if self.can_transition_to(target) {
            return Ok(());
        }
        if target == OrderStatus::Cancelled {
            return Err(Self::cancel_rejection(self));
        }
        Err(ServiceError::InvalidOperation(format!(
            "Invalid order status transition from {} to {}",
            self, target
        )))
    }

    fn cancel_rejection(from: OrderStatus) -> ServiceError {
        match from {
            OrderStatus::Shipped | OrderStatus::Delivered => ServiceError::InvalidOperation(
                "cannot cancel order that has been shipped or delivered".to_string(),
            ),
            other => ServiceError::InvalidOperation(format!(
                "cannot cancel order in status {}",
                other
            )),
        }
    }

    /// `Ok` inside the cancellable window, `InvalidOperation` outside it.
    pub fn ensure_cancellable(self) -> Result<(), ServiceError> {
        if self.can_be_cancelled() {
            Ok(())
        } else {
            Err(Self::cancel_rejection(self))
        }
    }

    /// Inside the cancellable window.
    pub fn can_be_cancelled(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn can_be_processed(self) -> bool {
        self == OrderStatus::Confirmed
    }

    pub fn can_be_shipped(self) -> bool {
        self == OrderStatus::Processing
    }

    pub fn can_be_delivered(self) -> bool {
        self == OrderStatus::Shipped
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}
