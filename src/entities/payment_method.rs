use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment methods accepted at checkout.
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
pub enum PaymentMethod {
    #[sea_orm(string_value = "CREDIT_CARD")]
    CreditCard,
    #[sea_orm(string_value = "DEBIT_CARD")]
    DebitCard,
    #[sea_orm(string_value = "PIX")]
    Pix,
    #[sea_orm(string_value = "BOLETO")]
    Boleto,
    #[sea_orm(string_value = "BANK_TRANSFER")]
    BankTransfer,
    #[sea_orm(string_value = "CASH")]
    Cash,
}

impl PaymentMethod {
    /// Human-readable label used in notes and notifications.
    pub fn display_name(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "Credit card",
            PaymentMethod::DebitCard => "Debit card",
            PaymentMethod::Pix => "PIX",
            PaymentMethod::Boleto => "Boleto",
            PaymentMethod::BankTransfer => "Bank transfer",
            PaymentMethod::Cash => "Cash",
        }
    }

    /// Card methods carry last-4/brand/holder fields.
    pub fn is_card(self) -> bool {
        matches!(self, PaymentMethod::CreditCard | PaymentMethod::DebitCard)
    }

    /// Settled online at checkout time.
    pub fn requires_online_processing(self) -> bool {
        matches!(
            self,
            PaymentMethod::CreditCard | PaymentMethod::DebitCard | PaymentMethod::Pix
        )
    }

    /// Settled out of band and confirmed manually by staff.
    pub fn requires_confirmation(self) -> bool {
        matches!(self, PaymentMethod::Boleto | PaymentMethod::BankTransfer)
    }

    pub fn estimated_processing_hours(self) -> u32 {
        match self {
            PaymentMethod::Boleto => 72,
            PaymentMethod::BankTransfer => 24,
            _ => 0,
        }
    }

    /// Processing-fee percentage used when no fee schedule overrides it.
    pub fn default_fee_rate(self) -> Decimal {
        match self {
            PaymentMethod::CreditCard => dec!(3.5),
            PaymentMethod::DebitCard => dec!(2.0),
            PaymentMethod::Pix => dec!(0.5),
            PaymentMethod::Boleto => dec!(2.5),
            PaymentMethod::BankTransfer => dec!(1.0),
            PaymentMethod::Cash => Decimal::ZERO,
        }
    }

    /// How long a freshly created payment stays payable.
    pub fn default_expiry(self) -> Duration {
        match self {
            PaymentMethod::Boleto => Duration::days(3),
            PaymentMethod::Pix => Duration::minutes(30),
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => Duration::minutes(15),
            PaymentMethod::BankTransfer | PaymentMethod::Cash => Duration::hours(24),
        }
    }
}
