use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use super::payment_method::PaymentMethod;

/// A single payment attempt against an order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// `PAY-<yyyyMMddHHmmss>-<nnn>`
    #[sea_orm(unique)]
    pub transaction_id: String,
    pub order_id: i64,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub amount: Decimal,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub processing_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub refund_amount: Decimal,

    #[sea_orm(nullable)]
    pub gateway_transaction_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_response: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_reference: Option<String>,

    #[sea_orm(nullable)]
    pub card_last_four: Option<String>,
    #[sea_orm(nullable)]
    pub card_brand: Option<String>,
    #[sea_orm(nullable)]
    pub card_holder_name: Option<String>,

    #[sea_orm(nullable)]
    pub pix_key: Option<String>,
    #[sea_orm(nullable)]
    pub pix_qr_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub pix_copy_paste: Option<String>,

    #[sea_orm(nullable)]
    pub boleto_number: Option<String>,
    #[sea_orm(nullable)]
    pub boleto_barcode: Option<String>,
    #[sea_orm(nullable)]
    pub boleto_due_date: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub boleto_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub authorized_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub captured_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,

    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    #[sea_orm(nullable)]
    pub failure_reason: Option<String>,
    pub version: i32,
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

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Past its deadline while still waiting on the customer or gateway.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_in_progress() && self.expires_at.map_or(false, |at| at < now)
    }

    pub fn available_refund_amount(&self) -> Decimal {
        self.amount - self.refund_amount
    }

    pub fn can_be_refunded(&self) -> bool {
        self.status.is_successful() && self.refund_amount < self.amount
    }

    /// Amount the store keeps after the processing fee.
    pub fn net_amount(&self) -> Decimal {
        self.amount - self.processing_fee
    }
}

impl ActiveModel {
    /// Sets `status` and stamps the lifecycle timestamp that belongs to it.
    pub fn apply_status(&mut self, status: PaymentStatus, now: DateTime<Utc>) {
        self.status = Set(status);
        self.updated_at = Set(now);
        match status {
            PaymentStatus::Authorized => self.authorized_at = Set(Some(now)),
            PaymentStatus::Captured => self.captured_at = Set(Some(now)),
            PaymentStatus::Confirmed => self.confirmed_at = Set(Some(now)),
            PaymentStatus::Cancelled
            | PaymentStatus::Failed
            | PaymentStatus::Rejected
            | PaymentStatus::Expired => self.cancelled_at = Set(Some(now)),
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Refunded => {}
        }
    }
}

/// Payment status enumeration.
///
/// ```text
/// PENDING ──► PROCESSING ──► AUTHORIZED ──► CAPTURED ──► CONFIRMED ──► REFUNDED
///    │             │              │             └──────────────────────► REFUNDED
///    │             ├──► CONFIRMED └──► CANCELLED
///    │             ├──► FAILED
///    │             └──► REJECTED
///    ├──► CANCELLED
///    └──► EXPIRED
/// ```
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
pub enum PaymentStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "AUTHORIZED")]
    Authorized,
    #[sea_orm(string_value = "CAPTURED")]
    Captured,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
}

impl PaymentStatus {
    /// Statuses reachable in one step through the generic transition entry point.
    pub fn next_statuses(self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Pending => &[Processing, Cancelled, Expired],
            Processing => &[Authorized, Confirmed, Failed, Rejected],
            Authorized => &[Captured, Cancelled],
            Captured => &[Confirmed, Refunded],
            Confirmed => &[Refunded],
            Cancelled | Failed | Refunded | Expired | Rejected => &[],
        }
    }

    /// Same-status is an allowed no-op; nothing leaves a final status.
    pub fn can_transition_to(self, target: PaymentStatus) -> bool {
        if self == target {
            return true;
        }
        if self.is_final() {
            return false;
        }
        self.next_statuses().contains(&target)
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            PaymentStatus::Confirmed
                | PaymentStatus::Cancelled
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::Expired
                | PaymentStatus::Rejected
        )
    }

    /// Money has been taken from the customer.
    pub fn is_successful(self) -> bool {
        matches!(self, PaymentStatus::Confirmed | PaymentStatus::Captured)
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Authorized
        )
    }

    pub fn has_failed(self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Expired
                | PaymentStatus::Rejected
        )
    }

    pub const FAILED_STATUSES: [PaymentStatus; 4] = [
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Expired,
        PaymentStatus::Rejected,
    ];

    pub const IN_PROGRESS_STATUSES: [PaymentStatus; 3] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Authorized,
    ];

    pub const SUCCESSFUL_STATUSES: [PaymentStatus; 2] =
        [PaymentStatus::Confirmed, PaymentStatus::Captured];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveValue, Iterable};

    use PaymentStatus::*;

    #[rstest]
    #[case(Pending, Processing, true)]
    #[case(Pending, Cancelled, true)]
    #[case(Pending, Expired, true)]
    #[case(Pending, Confirmed, false)]
    #[case(Processing, Authorized, true)]
    #[case(Processing, Confirmed, true)]
    #[case(Processing, Failed, true)]
    #[case(Processing, Rejected, true)]
    #[case(Processing, Cancelled, false)]
    #[case(Authorized, Captured, true)]
    #[case(Authorized, Cancelled, true)]
    #[case(Authorized, Confirmed, false)]
    #[case(Captured, Confirmed, true)]
    #[case(Captured, Refunded, true)]
    #[case(Confirmed, Refunded, false)]
    #[case(Confirmed, Confirmed, true)]
    #[case(Failed, Pending, false)]
    #[case(Expired, Expired, true)]
    fn transition_table(
        #[case] from: PaymentStatus,
        #[case] to: PaymentStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn final_statuses_have_no_exit() {
        for from in PaymentStatus::iter().filter(|s| s.is_final()) {
            for to in PaymentStatus::iter().filter(|to| *to != from) {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn predicates_partition_statuses() {
        for status in PaymentStatus::iter() {
            // every status is either in progress or final, except CAPTURED
            if status == Captured {
                assert!(!status.is_final() && !status.is_in_progress());
                continue;
            }
            assert_ne!(status.is_final(), status.is_in_progress(), "{}", status);
        }
        assert!(Refunded.is_final() && !Refunded.has_failed() && !Refunded.is_successful());
    }

    fn sample(status: PaymentStatus) -> Model {
        let now = Utc::now();
        Model {
            id: 1,
            transaction_id: "PAY-20240101120000-001".into(),
            order_id: 1,
            payment_method: PaymentMethod::Pix,
            status,
            amount: dec!(100.00),
            currency: "BRL".into(),
            processing_fee: dec!(0.50),
            refund_amount: Decimal::ZERO,
            gateway_transaction_id: None,
            gateway_response: None,
            gateway_reference: None,
            card_last_four: None,
            card_brand: None,
            card_holder_name: None,
            pix_key: None,
            pix_qr_code: None,
            pix_copy_paste: None,
            boleto_number: None,
            boleto_barcode: None,
            boleto_due_date: None,
            boleto_url: None,
            created_at: now,
            updated_at: now,
            authorized_at: None,
            captured_at: None,
            confirmed_at: None,
            cancelled_at: None,
            expires_at: Some(now - Duration::minutes(1)),
            notes: None,
            failure_reason: None,
            version: 1,
        }
    }

    #[test]
    fn expiry_only_applies_in_progress() {
        let now = Utc::now();
        assert!(sample(Pending).is_expired(now));
        assert!(sample(Authorized).is_expired(now));
        assert!(!sample(Confirmed).is_expired(now));
    }

    #[test]
    fn refund_helpers() {
        let mut payment = sample(Confirmed);
        payment.refund_amount = dec!(40.00);
        assert!(payment.can_be_refunded());
        assert_eq!(payment.available_refund_amount(), dec!(60.00));
        assert_eq!(payment.net_amount(), dec!(99.50));
        assert!(!sample(Pending).can_be_refunded());
    }

    #[test]
    fn apply_status_stamps_matching_timestamp() {
        let now = Utc::now();
        let mut active: ActiveModel = sample(Processing).into();
        active.apply_status(Failed, now);
        assert_eq!(active.cancelled_at, ActiveValue::Set(Some(now)));
        assert_eq!(active.confirmed_at, ActiveValue::Unchanged(None));
        assert_eq!(active.captured_at, ActiveValue::Unchanged(None));

        let mut active: ActiveModel = sample(Captured).into();
        active.apply_status(Confirmed, now);
        assert_eq!(active.confirmed_at, ActiveValue::Set(Some(now)));
    }
}
