use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, Set};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use validator::{Validate, ValidationError};

use crate::auth::Actor;
use crate::config::PaymentConfig;
use crate::entities::payment::ActiveModel as PaymentActiveModel;
use crate::entities::prelude::PaymentModel;
use crate::entities::{PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::money;
use crate::notifications::PaymentConfirmation;
use crate::repositories::{is_unique_violation, OrderRepository, PaymentRepository};

use super::append_note;
use super::payment_gateway::{GatewayClient, GatewayDecision};

/// Method-specific fields supplied by the payer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PaymentDetails {
    #[validate(length(equal = 4, message = "Card last four must have 4 digits"))]
    pub card_last_four: Option<String>,
    #[validate(length(min = 1, max = 30))]
    pub card_brand: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub card_holder_name: Option<String>,
    #[validate(length(min = 1, max = 77))]
    pub pix_key: Option<String>,
}

impl PaymentDetails {
    pub fn card(
        last_four: impl Into<String>,
        brand: impl Into<String>,
        holder_name: impl Into<String>,
    ) -> Self {
        Self {
            card_last_four: Some(last_four.into()),
            card_brand: Some(brand.into()),
            card_holder_name: Some(holder_name.into()),
            pix_key: None,
        }
    }

    /// Field validation plus the card fields that card methods require.
    pub fn check_for(&self, method: PaymentMethod) -> Result<(), ServiceError> {
        self.validate()?;
        if method.is_card() {
            let present = |field: &Option<String>| {
                field.as_deref().map_or(false, |v| !v.trim().is_empty())
            };
            if !(present(&self.card_last_four)
                && present(&self.card_brand)
                && present(&self.card_holder_name))
            {
                return Err(ServiceError::ValidationError(format!(
                    "{} payments require card last four digits, brand and holder name",
                    method.display_name()
                )));
            }
        }
        Ok(())
    }
}

/// Request to open a payment attempt against an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub order_id: i64,
    pub method: PaymentMethod,
    #[validate(custom = "validate_payable_amount")]
    pub amount: Decimal,
    #[serde(flatten)]
    pub details: PaymentDetails,
    /// Overrides the per-method default deadline
    pub expires_at: Option<DateTime<Utc>>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

impl CreatePaymentRequest {
    pub fn new(order_id: i64, method: PaymentMethod, amount: Decimal) -> Self {
        Self {
            order_id,
            method,
            amount,
            details: PaymentDetails::default(),
            expires_at: None,
            notes: None,
        }
    }

    pub fn with_details(mut self, details: PaymentDetails) -> Self {
        self.details = details;
        self
    }

    pub fn check(&self) -> Result<(), ServiceError> {
        self.validate()?;
        self.details.check_for(self.method)
    }
}

fn validate_payable_amount(amount: &Decimal) -> Result<(), ValidationError> {
    money::payable_amount(*amount)
        .map(|_| ())
        .map_err(ValidationError::new)
}

/// Aggregate over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatistics {
    pub total_count: u64,
    pub successful_count: u64,
    pub successful_amount: Decimal,
    pub failed_count: u64,
}

/// Successful volume for one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodStatistics {
    pub method: PaymentMethod,
    pub successful_count: u64,
    pub successful_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_count: u64,
    pub successful_amount: Decimal,
    pub by_method: BTreeMap<PaymentMethod, u64>,
    pub by_status: BTreeMap<PaymentStatus, u64>,
}

/// Payment engine: creates payments, routes them by method and drives the
/// payment state machine.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn GatewayClient>,
    config: PaymentConfig,
    event_sender: Option<Arc<EventSender>>,
    payments: PaymentRepository,
    orders: OrderRepository,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn GatewayClient>,
        config: PaymentConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateway,
            config,
            event_sender,
            payments: PaymentRepository::new(),
            orders: OrderRepository::new(),
        }
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    /// Processing fee for `amount` under the configured fee table.
    pub fn processing_fee(&self, method: PaymentMethod, amount: Decimal) -> Decimal {
        money::percentage_of(amount, self.config.fees.rate_for(method))
    }

    /// Persists a new PENDING payment with its fee and deadline computed.
    #[instrument(skip(self, request), fields(order_id = request.order_id, method = %request.method))]
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentModel, ServiceError> {
        request.check()?;

        let db = &*self.db;
        self.orders.get(db, request.order_id).await?;

        let now = Utc::now();
        let amount = money::round_money(request.amount);
        let template = PaymentActiveModel {
            order_id: Set(request.order_id),
            payment_method: Set(request.method),
            status: Set(PaymentStatus::Pending),
            amount: Set(amount),
            currency: Set(self.config.currency.clone()),
            processing_fee: Set(self.processing_fee(request.method, amount)),
            refund_amount: Set(Decimal::ZERO),
            gateway_transaction_id: Set(None),
            gateway_response: Set(None),
            gateway_reference: Set(None),
            card_last_four: Set(request.details.card_last_four),
            card_brand: Set(request.details.card_brand),
            card_holder_name: Set(request.details.card_holder_name),
            pix_key: Set(request.details.pix_key),
            pix_qr_code: Set(None),
            pix_copy_paste: Set(None),
            boleto_number: Set(None),
            boleto_barcode: Set(None),
            boleto_due_date: Set(None),
            boleto_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            authorized_at: Set(None),
            captured_at: Set(None),
            confirmed_at: Set(None),
            cancelled_at: Set(None),
            expires_at: Set(Some(
                request
                    .expires_at
                    .unwrap_or_else(|| now + request.method.default_expiry()),
            )),
            notes: Set(request.notes),
            failure_reason: Set(None),
            version: Set(1),
            ..Default::default()
        };

        let attempts = self.config.transaction_id_attempts.max(1);
        let mut attempt = 0;
        let payment = loop {
            attempt += 1;
            let mut candidate = template.clone();
            candidate.transaction_id = Set(generate_transaction_id(now));
            match self.payments.insert(db, candidate).await {
                Ok(payment) => break payment,
                Err(e) if is_unique_violation(&e) && attempt < attempts => {
                    debug!(attempt, "transaction id collision, retrying");
                }
                Err(e) if is_unique_violation(&e) => {
                    error!(attempts, "could not allocate a unique transaction id");
                    return Err(ServiceError::Conflict(
                        "could not allocate a unique transaction id".to_string(),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "Failed to insert payment");
                    return Err(e.into());
                }
            }
        };

        info!(
            payment_id = payment.id,
            transaction_id = %payment.transaction_id,
            amount = %payment.amount,
            fee = %payment.processing_fee,
            "Payment created"
        );
        events::publish(
            self.event_sender.as_ref(),
            Event::PaymentCreated {
                payment_id: payment.id,
                order_id: payment.order_id,
                method: payment.payment_method,
                amount: payment.amount,
            },
        );

        Ok(payment)
    }

    /// Creates a payment and runs the flow of its method.
    ///
    /// Cards are authorized immediately; PIX and boleto get their payment
    /// artifacts; bank transfer and cash wait for manual confirmation.
    #[instrument(skip(self, request), fields(order_id = request.order_id, method = %request.method))]
    pub async fn process_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self.create_payment(request).await?;
        match payment.payment_method {
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
                self.process_credit_card_payment(payment.id).await
            }
            PaymentMethod::Pix => self.process_pix_payment(payment.id).await,
            PaymentMethod::Boleto => self.process_boleto_payment(payment.id).await,
            PaymentMethod::BankTransfer | PaymentMethod::Cash => {
                self.process_bank_transfer_payment(payment.id).await
            }
        }
    }

    /// Authorizes a pending card payment with the gateway.
    ///
    /// Approval walks AUTHORIZED, CAPTURED and CONFIRMED in a single write.
    /// A decline, gateway error or timeout leaves the payment FAILED.
    #[instrument(skip(self))]
    pub async fn process_credit_card_payment(
        &self,
        payment_id: i64,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        if !payment.payment_method.is_card() {
            return Err(ServiceError::InvalidOperation(format!(
                "payment {} is not a card payment",
                payment_id
            )));
        }
        require_pending(&payment)?;

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.apply_status(PaymentStatus::Processing, Utc::now());
        let processing = self.payments.update_versioned(db, active, version).await?;
        self.publish_status_change(&payment, &processing);

        let outcome =
            tokio::time::timeout(self.config.gateway_timeout(), self.gateway.authorize(&processing))
                .await;

        let version = processing.version;
        let mut active: PaymentActiveModel = processing.clone().into();
        let now = Utc::now();
        match outcome {
            Ok(Ok(GatewayDecision::Approved {
                gateway_transaction_id,
                response,
            })) => {
                active.apply_status(PaymentStatus::Authorized, now);
                active.apply_status(PaymentStatus::Captured, now);
                active.apply_status(PaymentStatus::Confirmed, now);
                active.gateway_transaction_id = Set(Some(gateway_transaction_id));
                active.gateway_response = Set(Some(response));
            }
            Ok(Ok(GatewayDecision::Declined { reason })) => {
                info!(payment_id, %reason, "Card payment declined");
                active.apply_status(PaymentStatus::Failed, now);
                active.failure_reason = Set(Some(reason));
            }
            Ok(Err(e)) => {
                warn!(payment_id, error = %e, "Gateway error during authorization");
                active.apply_status(PaymentStatus::Failed, now);
                active.failure_reason = Set(Some(format!("Gateway error: {}", e)));
            }
            Err(_) => {
                warn!(
                    payment_id,
                    timeout_ms = self.config.gateway_timeout_ms,
                    "Gateway authorization timed out"
                );
                active.apply_status(PaymentStatus::Failed, now);
                active.failure_reason = Set(Some(format!(
                    "Gateway timeout after {} ms",
                    self.config.gateway_timeout_ms
                )));
            }
        }

        let settled = self.payments.update_versioned(db, active, version).await?;
        info!(payment_id, status = %settled.status, "Card payment processed");
        self.publish_status_change(&processing, &settled);
        if settled.status == PaymentStatus::Confirmed {
            self.publish_confirmation(&settled).await;
        }
        Ok(settled)
    }

    /// Generates the PIX QR reference and copy-paste payload. The payment
    /// stays PENDING until the transfer is confirmed.
    #[instrument(skip(self))]
    pub async fn process_pix_payment(&self, payment_id: i64) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        require_method(&payment, &[PaymentMethod::Pix])?;
        require_pending(&payment)?;

        let now = Utc::now();
        let key = payment
            .pix_key
            .clone()
            .unwrap_or_else(|| self.config.pix_key.clone());
        let payload = pix_copy_paste(
            &key,
            payment.amount,
            &self.config.merchant_name,
            &self.config.merchant_city,
        );

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.pix_key = Set(Some(key));
        let qr_code = pix_qr_code(payment.amount, now);
        active.gateway_reference = Set(Some(qr_code.clone()));
        active.pix_qr_code = Set(Some(qr_code));
        active.pix_copy_paste = Set(Some(payload));
        active.gateway_transaction_id = Set(Some(format!("PIX-{}", now.timestamp_millis())));
        active.updated_at = Set(now);

        let updated = self.payments.update_versioned(db, active, version).await?;
        info!(payment_id, "PIX payment artifacts generated");
        Ok(updated)
    }

    /// Issues the boleto (number, barcode, viewer URL, due date). The
    /// payment stays PENDING until the boleto is paid.
    #[instrument(skip(self))]
    pub async fn process_boleto_payment(
        &self,
        payment_id: i64,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        require_method(&payment, &[PaymentMethod::Boleto])?;
        require_pending(&payment)?;

        let now = Utc::now();
        let number = boleto_number(&mut rand::thread_rng());

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.boleto_barcode = Set(Some(boleto_barcode(payment.amount, &number)?));
        active.boleto_url = Set(Some(format!(
            "{}/{}",
            self.config.boleto_base_url.trim_end_matches('/'),
            number
        )));
        active.boleto_due_date = Set(Some(now + Duration::days(3)));
        active.gateway_reference = Set(Some(number.clone()));
        active.boleto_number = Set(Some(number));
        active.gateway_transaction_id = Set(Some(format!("BOL-{}", now.timestamp_millis())));
        active.updated_at = Set(now);

        let updated = self.payments.update_versioned(db, active, version).await?;
        info!(payment_id, boleto_number = ?updated.boleto_number, "Boleto issued");
        Ok(updated)
    }

    /// Bank transfers and cash are settled out of band; the payment is left
    /// PENDING with a note for the back office.
    #[instrument(skip(self))]
    pub async fn process_bank_transfer_payment(
        &self,
        payment_id: i64,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        require_method(&payment, &[PaymentMethod::BankTransfer, PaymentMethod::Cash])?;
        require_pending(&payment)?;

        let note = match payment.payment_method {
            PaymentMethod::Cash => "Awaiting cash payment confirmation",
            _ => "Awaiting bank transfer confirmation",
        };

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.notes = Set(Some(append_note(payment.notes.as_deref(), note)));
        active.updated_at = Set(Utc::now());

        let updated = self.payments.update_versioned(db, active, version).await?;
        info!(payment_id, method = %updated.payment_method, "Payment awaiting manual confirmation");
        Ok(updated)
    }

    /// Manual confirmation of a pending payment (boleto paid, transfer
    /// received, ...). Staff only.
    #[instrument(skip(self, actor, notes), fields(actor_id = actor.user_id))]
    pub async fn confirm_payment(
        &self,
        actor: &Actor,
        payment_id: i64,
        notes: Option<String>,
    ) -> Result<PaymentModel, ServiceError> {
        actor.require_staff("confirm payment")?;

        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            warn!(payment_id, status = %payment.status, "confirm rejected");
            return Err(ServiceError::InvalidOperation(format!(
                "only pending payments can be confirmed; payment {} is {}",
                payment_id, payment.status
            )));
        }

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.apply_status(PaymentStatus::Confirmed, Utc::now());
        if let Some(note) = notes.as_deref().filter(|n| !n.trim().is_empty()) {
            active.notes = Set(Some(append_note(payment.notes.as_deref(), note)));
        }

        let confirmed = self.payments.update_versioned(db, active, version).await?;
        info!(payment_id, "Payment confirmed");
        self.publish_status_change(&payment, &confirmed);
        self.publish_confirmation(&confirmed).await;
        Ok(confirmed)
    }

    /// Cancels a payment that has not reached a final status.
    #[instrument(skip(self, actor), fields(actor_id = actor.user_id))]
    pub async fn cancel_payment(
        &self,
        actor: &Actor,
        payment_id: i64,
        reason: &str,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        let order = self.orders.get(db, payment.order_id).await?;
        actor.require_owner_or_staff(order.user_id, "cancel payment")?;

        if payment.status.is_final() {
            return Err(ServiceError::InvalidOperation(format!(
                "payment {} is already {}",
                payment_id, payment.status
            )));
        }

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.apply_status(PaymentStatus::Cancelled, Utc::now());
        active.failure_reason = Set(Some(reason.to_string()));

        let cancelled = self.payments.update_versioned(db, active, version).await?;
        info!(payment_id, %reason, "Payment cancelled");
        self.publish_status_change(&payment, &cancelled);
        Ok(cancelled)
    }

    /// Refunds part or all of a successful payment. Staff only.
    ///
    /// The cumulative refund can never exceed the payment amount; reaching
    /// it moves the payment to REFUNDED.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.user_id, amount = %amount))]
    pub async fn refund_payment(
        &self,
        actor: &Actor,
        payment_id: i64,
        amount: Decimal,
        reason: &str,
    ) -> Result<PaymentModel, ServiceError> {
        actor.require_staff("refund payment")?;
        let amount = money::round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "refund amount must be at least one cent".to_string(),
            ));
        }

        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        if !payment.status.is_successful() {
            return Err(ServiceError::InvalidOperation(format!(
                "payment {} is {} and cannot be refunded",
                payment_id, payment.status
            )));
        }
        let available = payment.available_refund_amount();
        if amount > available {
            warn!(payment_id, %amount, %available, "refund exceeds available amount");
            return Err(ServiceError::InvalidOperation(format!(
                "refund of {} exceeds the available {}",
                money::format_brl(amount),
                money::format_brl(available)
            )));
        }

        let total_refunded = payment.refund_amount + amount;
        let now = Utc::now();
        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.refund_amount = Set(total_refunded);
        active.updated_at = Set(now);
        active.notes = Set(Some(append_note(
            payment.notes.as_deref(),
            &format!("Refund: {}", reason),
        )));
        if total_refunded >= payment.amount {
            active.apply_status(PaymentStatus::Refunded, now);
        }

        let refunded = self.payments.update_versioned(db, active, version).await?;
        info!(
            payment_id,
            refunded = %amount,
            total_refunded = %total_refunded,
            status = %refunded.status,
            "Payment refunded"
        );
        self.publish_status_change(&payment, &refunded);
        events::publish(
            self.event_sender.as_ref(),
            Event::PaymentRefunded {
                payment_id,
                order_id: refunded.order_id,
                amount,
                total_refunded,
            },
        );
        Ok(refunded)
    }

    /// Generic transition entry point, validated against the payment
    /// adjacency table. Same-status is a no-op. Staff only.
    #[instrument(skip(self, actor), fields(actor_id = actor.user_id, new_status = %new_status))]
    pub async fn update_payment_status(
        &self,
        actor: &Actor,
        payment_id: i64,
        new_status: PaymentStatus,
    ) -> Result<PaymentModel, ServiceError> {
        actor.require_staff("update payment status")?;

        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        self.apply_transition(payment, new_status).await
    }

    #[instrument(skip(self, actor), fields(actor_id = actor.user_id, new_status = %new_status))]
    pub async fn update_payment_status_by_transaction_id(
        &self,
        actor: &Actor,
        transaction_id: &str,
        new_status: PaymentStatus,
    ) -> Result<PaymentModel, ServiceError> {
        actor.require_staff("update payment status")?;

        let db = &*self.db;
        let payment = self
            .payments
            .find_by_transaction_id(db, transaction_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", transaction_id))?;
        self.apply_transition(payment, new_status).await
    }

    async fn apply_transition(
        &self,
        payment: PaymentModel,
        new_status: PaymentStatus,
    ) -> Result<PaymentModel, ServiceError> {
        if payment.status == new_status {
            debug!(payment_id = payment.id, status = %new_status, "status unchanged");
            return Ok(payment);
        }
        if !payment.status.can_transition_to(new_status) {
            warn!(
                payment_id = payment.id,
                from = %payment.status,
                to = %new_status,
                "invalid payment status transition"
            );
            return Err(ServiceError::InvalidOperation(format!(
                "invalid payment status transition from {} to {}",
                payment.status, new_status
            )));
        }

        let version = payment.version;
        let mut active: PaymentActiveModel = payment.clone().into();
        active.apply_status(new_status, Utc::now());
        let updated = self.payments.update_versioned(&*self.db, active, version).await?;

        info!(
            payment_id = updated.id,
            from = %payment.status,
            to = %new_status,
            "Payment status updated"
        );
        self.publish_status_change(&payment, &updated);
        if new_status == PaymentStatus::Confirmed {
            self.publish_confirmation(&updated).await;
        }
        Ok(updated)
    }

    /// Removes a payment record. Only payments in a final status may be
    /// deleted. Staff only.
    #[instrument(skip(self, actor), fields(actor_id = actor.user_id))]
    pub async fn delete_payment(&self, actor: &Actor, payment_id: i64) -> Result<(), ServiceError> {
        actor.require_staff("delete payment")?;

        let db = &*self.db;
        let payment = self.payments.get(db, payment_id).await?;
        if !payment.status.is_final() {
            return Err(ServiceError::InvalidOperation(format!(
                "payment {} is {}; only final payments can be deleted",
                payment_id, payment.status
            )));
        }
        self.payments.delete(db, payment_id).await?;
        info!(payment_id, "Payment deleted");
        Ok(())
    }

    /// Moves every in-progress payment whose deadline passed before `now` to
    /// EXPIRED and returns the expired payments.
    ///
    /// Rows changed concurrently are skipped; the next run picks them up if
    /// they are still overdue, so running the sweep twice is harmless.
    #[instrument(skip(self))]
    pub async fn expire_overdue_payments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        let db = &*self.db;
        let overdue = self.payments.find_expired(db, now).await?;
        let mut expired = Vec::with_capacity(overdue.len());

        for payment in overdue {
            let version = payment.version;
            let mut active: PaymentActiveModel = payment.clone().into();
            active.apply_status(PaymentStatus::Expired, now);
            active.failure_reason = Set(Some("Payment expired".to_string()));

            match self.payments.update_versioned(db, active, version).await {
                Ok(updated) => {
                    self.publish_status_change(&payment, &updated);
                    expired.push(updated);
                }
                Err(ServiceError::Conflict(msg)) => {
                    debug!(payment_id = payment.id, %msg, "skipping payment changed during sweep");
                }
                Err(e) => {
                    error!(payment_id = payment.id, error = %e, "Failed to expire payment");
                    return Err(e);
                }
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue payments");
        }
        Ok(expired)
    }

    pub async fn get_payment(&self, payment_id: i64) -> Result<PaymentModel, ServiceError> {
        self.payments.get(&*self.db, payment_id).await
    }

    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        self.payments
            .find_by_transaction_id(&*self.db, transaction_id)
            .await
    }

    pub async fn find_by_gateway_transaction_id(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        self.payments
            .find_by_gateway_transaction_id(&*self.db, gateway_transaction_id)
            .await
    }

    /// Payments of an order, newest first
    pub async fn payments_for_order(&self, order_id: i64) -> Result<Vec<PaymentModel>, ServiceError> {
        self.payments.find_by_order(&*self.db, order_id).await
    }

    /// Payments across all orders of a user, newest first
    pub async fn payments_for_user(&self, user_id: i64) -> Result<Vec<PaymentModel>, ServiceError> {
        let db = &*self.db;
        let order_ids = self.orders.ids_for_user(db, user_id).await?;
        self.payments.find_by_orders(db, &order_ids).await
    }

    /// Substring search over transaction ids, gateway ids and payer references
    pub async fn search_payments(&self, term: &str) -> Result<Vec<PaymentModel>, ServiceError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.payments.search_by_reference(&*self.db, term).await
    }

    /// Sum of the successful payments of an order.
    pub async fn total_paid_for_order(&self, order_id: i64) -> Result<Decimal, ServiceError> {
        let paid = self
            .payments
            .find_successful_by_order(&*self.db, order_id)
            .await?;
        Ok(money::sum(paid.into_iter().map(|p| p.amount)))
    }

    pub async fn is_order_fully_paid(&self, order_id: i64) -> Result<bool, ServiceError> {
        let order = self.orders.get(&*self.db, order_id).await?;
        Ok(self.total_paid_for_order(order_id).await? >= order.total)
    }

    /// The most recently confirmed successful payment of an order.
    pub async fn successful_payment_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(self
            .payments
            .find_successful_by_order(&*self.db, order_id)
            .await?
            .into_iter()
            .next())
    }

    /// Pending boletos and bank transfers waiting on the back office.
    pub async fn payments_requiring_confirmation(&self) -> Result<Vec<PaymentModel>, ServiceError> {
        self.payments
            .find_by_methods_and_status(
                &*self.db,
                &[PaymentMethod::Boleto, PaymentMethod::BankTransfer],
                PaymentStatus::Pending,
            )
            .await
    }

    /// What the expiry sweep would pick up at `now`, without changing anything.
    pub async fn expired_payments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        self.payments.find_expired(&*self.db, now).await
    }

    #[instrument(skip(self))]
    pub async fn payment_statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PaymentStatistics, ServiceError> {
        let payments = self.payments.find_created_between(&*self.db, start, end).await?;
        Ok(summarize(&payments))
    }

    /// Successful volume per method, busiest method first.
    #[instrument(skip(self))]
    pub async fn method_statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MethodStatistics>, ServiceError> {
        let payments = self.payments.find_created_between(&*self.db, start, end).await?;

        let mut per_method: BTreeMap<PaymentMethod, (u64, Decimal)> = BTreeMap::new();
        for payment in payments.iter().filter(|p| p.status.is_successful()) {
            let entry = per_method
                .entry(payment.payment_method)
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += payment.amount;
        }

        let mut stats: Vec<MethodStatistics> = per_method
            .into_iter()
            .map(|(method, (count, amount))| MethodStatistics {
                method,
                successful_count: count,
                successful_amount: money::round_money(amount),
            })
            .collect();
        stats.sort_by(|a, b| b.successful_count.cmp(&a.successful_count));
        Ok(stats)
    }

    /// Counts by method and by status for payments created on `date` (UTC).
    #[instrument(skip(self))]
    pub async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, ServiceError> {
        let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let end = start + Duration::days(1);
        let payments = self.payments.find_created_between(&*self.db, start, end).await?;

        let mut by_method = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        for payment in &payments {
            *by_method.entry(payment.payment_method).or_insert(0) += 1;
            *by_status.entry(payment.status).or_insert(0) += 1;
        }

        Ok(DailySummary {
            date,
            total_count: payments.len() as u64,
            successful_amount: money::sum(
                payments
                    .iter()
                    .filter(|p| p.status.is_successful())
                    .map(|p| p.amount),
            ),
            by_method,
            by_status,
        })
    }

    fn publish_status_change(&self, before: &PaymentModel, after: &PaymentModel) {
        if before.status == after.status {
            return;
        }
        events::publish(
            self.event_sender.as_ref(),
            Event::PaymentStatusChanged {
                payment_id: after.id,
                order_id: after.order_id,
                old_status: before.status,
                new_status: after.status,
            },
        );
    }

    async fn publish_confirmation(&self, payment: &PaymentModel) {
        if self.event_sender.is_none() {
            return;
        }
        let order = match self.orders.find_by_id(&*self.db, payment.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(payment_id = payment.id, order_id = payment.order_id, "order missing for confirmation notice");
                return;
            }
            Err(e) => {
                warn!(payment_id = payment.id, error = %e, "could not load order for confirmation notice");
                return;
            }
        };
        events::publish(
            self.event_sender.as_ref(),
            Event::PaymentConfirmed(PaymentConfirmation {
                user_id: order.user_id,
                order_id: order.id,
                order_number: order.order_number,
                payment_id: payment.id,
                transaction_id: payment.transaction_id.clone(),
                method: payment.payment_method,
                amount: payment.amount,
                confirmed_at: payment.confirmed_at.unwrap_or(payment.updated_at),
            }),
        );
    }
}

fn require_pending(payment: &PaymentModel) -> Result<(), ServiceError> {
    if payment.status != PaymentStatus::Pending {
        return Err(ServiceError::InvalidOperation(format!(
            "payment {} is {}; only pending payments can be processed",
            payment.id, payment.status
        )));
    }
    Ok(())
}

fn require_method(payment: &PaymentModel, allowed: &[PaymentMethod]) -> Result<(), ServiceError> {
    if !allowed.contains(&payment.payment_method) {
        return Err(ServiceError::InvalidOperation(format!(
            "payment {} uses {}, not {}",
            payment.id,
            payment.payment_method,
            allowed
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(" or ")
        )));
    }
    Ok(())
}

fn summarize(payments: &[PaymentModel]) -> PaymentStatistics {
    let successful: Vec<&PaymentModel> =
        payments.iter().filter(|p| p.status.is_successful()).collect();
    PaymentStatistics {
        total_count: payments.len() as u64,
        successful_count: successful.len() as u64,
        successful_amount: money::sum(successful.iter().map(|p| p.amount)),
        failed_count: payments.iter().filter(|p| p.status.has_failed()).count() as u64,
    }
}

/// `PAY-<yyyyMMddHHmmss>-<nnn>`
pub fn generate_transaction_id(now: DateTime<Utc>) -> String {
    format!(
        "PAY-{}-{:03}",
        now.format("%Y%m%d%H%M%S"),
        rand::thread_rng().gen_range(0..1000)
    )
}

fn pix_qr_code(amount: Decimal, now: DateTime<Utc>) -> String {
    format!("PIX_QR_{}_{}", money::digits(amount), now.timestamp_millis())
}

/// EMV field: id, two-digit length, value.
fn emv_field(id: &str, value: &str) -> String {
    format!("{}{:02}{}", id, value.chars().count(), value)
}

/// PIX "copia e cola" payload in the EMV merchant-presented layout.
pub fn pix_copy_paste(key: &str, amount: Decimal, merchant_name: &str, merchant_city: &str) -> String {
    let account = format!("{}{}", emv_field("00", "BR.GOV.BCB.PIX"), emv_field("01", key));
    let amount = format!("{:.2}", money::round_money(amount));
    [
        "000201".to_string(),
        emv_field("26", &account),
        "52040000".to_string(),
        "5303986".to_string(),
        emv_field("54", &amount),
        "5802BR".to_string(),
        emv_field("59", merchant_name),
        emv_field("60", merchant_city),
    ]
    .concat()
}

fn boleto_number<R: Rng>(rng: &mut R) -> String {
    format!("{:011}", rng.gen_range(0..100_000_000_000u64))
}

/// Bank code 341, currency 9, ten-digit amount in cents, then the boleto
/// number, zero-filled to 44 digits.
pub fn boleto_barcode(amount: Decimal, number: &str) -> Result<String, ServiceError> {
    let cents = money::to_cents(amount)
        .filter(|cents| (0..=9_999_999_999).contains(cents))
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "{} does not fit a boleto barcode",
                money::format_brl(amount)
            ))
        })?;
    if number.len() > 30 || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServiceError::ValidationError(format!(
            "invalid boleto number {}",
            number
        )));
    }
    Ok(format!("{:0<44}", format!("3419{:010}{}", cents, number)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use regex::Regex;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn transaction_id_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = generate_transaction_id(now);
        let pattern = Regex::new(r"^PAY-20240309140507-\d{3}$").unwrap();
        assert!(pattern.is_match(&id), "{}", id);
    }

    #[test]
    fn pix_payload_layout() {
        let payload = pix_copy_paste("a@b.co", dec!(100), "Storefront", "SAO PAULO");
        assert_eq!(
            payload,
            "000201\
             26280014BR.GOV.BCB.PIX0106a@b.co\
             52040000\
             5303986\
             5406100.00\
             5802BR\
             5910Storefront\
             6009SAO PAULO"
        );
    }

    #[test]
    fn pix_qr_reference_uses_cents() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(pix_qr_code(dec!(12.5), now), "PIX_QR_1250_1700000000000");
    }

    #[test]
    fn boleto_barcode_is_44_digits() {
        let barcode = boleto_barcode(dec!(150.75), "00000012345").unwrap();
        assert_eq!(barcode.len(), 44);
        assert!(barcode.starts_with("34190000015075"));
        assert_eq!(&barcode[14..25], "00000012345");
        assert!(barcode.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn boleto_barcode_rejects_amounts_past_ten_digits_of_cents() {
        let largest = boleto_barcode(money::MAX_AMOUNT, "00000012345").unwrap();
        assert!(largest.starts_with("34199999999999"));
        assert_eq!(largest.len(), 44);

        assert_matches!(
            boleto_barcode(dec!(100000000.00), "00000012345"),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            boleto_barcode(Decimal::MAX, "00000012345"),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn boleto_number_has_eleven_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let number = boleto_number(&mut rng);
            assert_eq!(number.len(), 11);
            assert!(number.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[rstest]
    #[case(PaymentMethod::CreditCard, dec!(100), dec!(3.50))]
    #[case(PaymentMethod::DebitCard, dec!(100), dec!(2.00))]
    #[case(PaymentMethod::Pix, dec!(100), dec!(0.50))]
    #[case(PaymentMethod::Boleto, dec!(33.33), dec!(0.83))]
    #[case(PaymentMethod::BankTransfer, dec!(250), dec!(2.50))]
    #[case(PaymentMethod::Cash, dec!(99.99), dec!(0.00))]
    fn default_fee_table(
        #[case] method: PaymentMethod,
        #[case] amount: Decimal,
        #[case] fee: Decimal,
    ) {
        let config = PaymentConfig::default();
        assert_eq!(money::percentage_of(amount, config.fees.rate_for(method)), fee);
    }

    #[test]
    fn card_requests_need_card_fields() {
        let request = CreatePaymentRequest::new(1, PaymentMethod::CreditCard, dec!(10));
        assert_matches!(request.check(), Err(ServiceError::ValidationError(_)));

        let request = request.with_details(PaymentDetails::card("4242", "VISA", "Ana Souza"));
        assert!(request.check().is_ok());

        let pix = CreatePaymentRequest::new(1, PaymentMethod::Pix, dec!(10));
        assert!(pix.check().is_ok());
    }

    #[rstest]
    #[case(dec!(0))]
    #[case(dec!(-5))]
    fn non_positive_amount_is_rejected(#[case] amount: Decimal) {
        let request = CreatePaymentRequest::new(1, PaymentMethod::Pix, amount);
        assert_matches!(request.check(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn wrong_method_is_invalid_operation() {
        let payment = PaymentModel {
            id: 9,
            transaction_id: "PAY-20240101000000-000".into(),
            order_id: 1,
            payment_method: PaymentMethod::Pix,
            status: PaymentStatus::Pending,
            amount: dec!(1),
            currency: "BRL".into(),
            processing_fee: dec!(0),
            refund_amount: dec!(0),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
            authorized_at: None,
            captured_at: None,
            confirmed_at: None,
            cancelled_at: None,
            expires_at: None,
            notes: None,
            failure_reason: None,
            version: 1,
        };
        assert_matches!(
            require_method(&payment, &[PaymentMethod::Boleto]),
            Err(ServiceError::InvalidOperation(msg)) if msg.contains("BOLETO")
        );
        assert!(require_pending(&payment).is_ok());
    }
}
