use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::entities::payment::Model as PaymentModel;
use crate::entities::PaymentMethod;

/// Outcome of a card authorization. A decline is a normal business result,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayDecision {
    Approved {
        gateway_transaction_id: String,
        response: String,
    },
    Declined {
        reason: String,
    },
}

/// The gateway could not produce a decision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway rejected the request: {0}")]
    InvalidRequest(String),
}

/// Card-processor capability used by the payment engine.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn authorize(&self, payment: &PaymentModel) -> Result<GatewayDecision, GatewayError>;
}

/// Stand-in processor that approves a configurable share of authorizations
/// at random. Suitable for local runs only.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    approval_rate: f64,
}

impl SimulatedGateway {
    pub fn new(approval_rate: f64) -> Self {
        let approval_rate = if approval_rate.is_nan() {
            0.0
        } else {
            approval_rate.clamp(0.0, 1.0)
        };
        Self { approval_rate }
    }

    pub fn approval_rate(&self) -> f64 {
        self.approval_rate
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(0.9)
    }
}

fn gateway_prefix(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::DebitCard => "DC",
        _ => "CC",
    }
}

#[async_trait]
impl GatewayClient for SimulatedGateway {
    #[instrument(skip(self, payment), fields(transaction_id = %payment.transaction_id))]
    async fn authorize(&self, payment: &PaymentModel) -> Result<GatewayDecision, GatewayError> {
        if !payment.payment_method.is_card() {
            return Err(GatewayError::InvalidRequest(format!(
                "{} is not a card payment",
                payment.payment_method
            )));
        }

        let approved = rand::thread_rng().gen_bool(self.approval_rate);
        debug!(approved, "simulated authorization");

        if approved {
            Ok(GatewayDecision::Approved {
                gateway_transaction_id: format!(
                    "{}-{}",
                    gateway_prefix(payment.payment_method),
                    Utc::now().timestamp_millis()
                ),
                response: "Approved".to_string(),
            })
        } else {
            Ok(GatewayDecision::Declined {
                reason: format!("{} declined", payment.payment_method.display_name()),
            })
        }
    }
}
