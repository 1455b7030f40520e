use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::{
    auth::Actor,
    entities::{prelude::PaymentModel, PaymentMethod, PaymentStatus, ShippingAddress},
    errors::ServiceError,
    services::{
        orders::{CreateOrderRequest, OrderService, OrderWithItems},
        payments::{CreatePaymentRequest, PaymentDetails, PaymentService},
    },
};

/// Everything the customer submits at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub payment_details: PaymentDetails,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub order: OrderWithItems,
    pub payment: PaymentModel,
}

/// Checkout orchestration: cart to order to payment, and the cross-engine
/// follow-ups (payment confirmation reaching the order, order cancellation
/// reaching its open payments).
#[derive(Clone)]
pub struct CheckoutService {
    orders: OrderService,
    payments: PaymentService,
}

impl CheckoutService {
    pub fn new(orders: OrderService, payments: PaymentService) -> Self {
        Self { orders, payments }
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    /// Places an order for the actor's cart and starts its payment.
    ///
    /// Payment details are checked before anything is written. If the
    /// payment ends CONFIRMED (approved card), the order moves to CONFIRMED
    /// as well. A failure after the order is saved leaves it PENDING so the
    /// customer can pay again.
    #[instrument(skip(self, actor, request), fields(user_id = actor.user_id, method = %request.payment_method))]
    pub async fn checkout(
        &self,
        actor: &Actor,
        request: CheckoutRequest,
    ) -> Result<CheckoutResult, ServiceError> {
        request.validate()?;
        request.payment_details.check_for(request.payment_method)?;

        let created = self
            .orders
            .create_order_from_cart(CreateOrderRequest {
                user_id: actor.user_id,
                payment_method: request.payment_method,
                shipping_address: request.shipping_address,
                shipping_cost: request.shipping_cost,
                notes: request.notes,
            })
            .await?;

        let payment_request =
            CreatePaymentRequest::new(created.order.id, request.payment_method, created.order.total)
                .with_details(request.payment_details);
        let payment = self.payments.process_payment(payment_request).await.map_err(|e| {
            error!(order_id = created.order.id, error = %e, "Payment could not be started for new order");
            e
        })?;

        let order = if payment.status == PaymentStatus::Confirmed {
            self.orders.mark_payment_confirmed(created.order.id).await?
        } else {
            created.order
        };

        info!(
            order_id = order.id,
            payment_id = payment.id,
            order_status = %order.status,
            payment_status = %payment.status,
            "Checkout completed"
        );
        Ok(CheckoutResult {
            order: OrderWithItems {
                order,
                items: created.items,
            },
            payment,
        })
    }

    /// Staff confirmation of a pending payment, carried through to its order.
    #[instrument(skip(self, actor, notes), fields(actor_id = actor.user_id))]
    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        payment_id: i64,
        notes: Option<String>,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self.payments.confirm_payment(actor, payment_id, notes).await?;
        self.orders.mark_payment_confirmed(payment.order_id).await?;
        Ok(payment)
    }

    /// Re-runs the card flow for a pending card payment and, on approval,
    /// confirms the order.
    #[instrument(skip(self))]
    pub async fn retry_card_payment(&self, payment_id: i64) -> Result<PaymentModel, ServiceError> {
        let payment = self.payments.process_credit_card_payment(payment_id).await?;
        if payment.status == PaymentStatus::Confirmed {
            self.orders.mark_payment_confirmed(payment.order_id).await?;
        }
        Ok(payment)
    }

    /// Cancels the order, then every payment of it that is still open.
    /// A payment that cannot be cancelled is logged and left as is.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.user_id))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: i64,
        reason: Option<String>,
    ) -> Result<OrderWithItems, ServiceError> {
        self.orders.cancel_order(actor, order_id, reason.clone()).await?;

        let reason = reason.unwrap_or_else(|| "Order cancelled".to_string());
        for payment in self.payments.payments_for_order(order_id).await? {
            if payment.status.is_final() {
                continue;
            }
            if let Err(e) = self.payments.cancel_payment(actor, payment.id, &reason).await {
                warn!(payment_id = payment.id, error = %e, "Could not cancel payment of cancelled order");
            }
        }

        self.orders.get_order(order_id).await
    }
}
