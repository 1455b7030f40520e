use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::entities::{PaymentMethod, PaymentStatus};
use crate::notifications::{Notifier, OrderStatusChange, PaymentConfirmation};

/// Domain events published after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i64,
        user_id: i64,
        order_number: String,
        total: Decimal,
    },
    OrderStatusChanged(OrderStatusChange),
    PaymentCreated {
        payment_id: i64,
        order_id: i64,
        method: PaymentMethod,
        amount: Decimal,
    },
    PaymentStatusChanged {
        payment_id: i64,
        order_id: i64,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },
    PaymentConfirmed(PaymentConfirmation),
    PaymentRefunded {
        payment_id: i64,
        order_id: i64,
        amount: Decimal,
        total_refunded: Decimal,
    },
    CartCleared {
        user_id: i64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged(_) => "order_status_changed",
            Event::PaymentCreated { .. } => "payment_created",
            Event::PaymentStatusChanged { .. } => "payment_status_changed",
            Event::PaymentConfirmed(_) => "payment_confirmed",
            Event::PaymentRefunded { .. } => "payment_refunded",
            Event::CartCleared { .. } => "cart_cleared",
        }
    }
}

/// Handle for publishing events into the in-process queue.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns both ends.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Publishes without waiting. A full or closed queue drops the event with
    /// a warning; publishing never fails the caller.
    pub fn send_or_log(&self, event: Event) {
        let name = event.name();
        match self.sender.try_send(event) {
            Ok(()) => debug!(event = name, "event published"),
            Err(TrySendError::Full(_)) => warn!(event = name, "event queue full; event dropped"),
            Err(TrySendError::Closed(_)) => {
                warn!(event = name, "event queue closed; event dropped")
            }
        }
    }
}

/// Publishes through an optional sender.
pub(crate) fn publish(sender: Option<&Arc<EventSender>>, event: Event) {
    if let Some(sender) = sender {
        sender.send_or_log(event);
    }
}

/// Drains the event queue, forwarding customer-facing events to `notifier`.
/// Returns once every sender has been dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "Received event: {:?}", event);

        match &event {
            Event::PaymentConfirmed(notice) => {
                if let Err(e) = notifier.send_payment_confirmation(notice).await {
                    error!(
                        payment_id = notice.payment_id,
                        order_id = notice.order_id,
                        "Failed to send payment confirmation: {}",
                        e
                    );
                }
            }
            Event::OrderStatusChanged(notice) => {
                if let Err(e) = notifier.send_order_status_change(notice).await {
                    error!(
                        order_id = notice.order_id,
                        new_status = %notice.new_status,
                        "Failed to send order status notification: {}",
                        e
                    );
                }
            }
            Event::PaymentStatusChanged {
                payment_id,
                old_status,
                new_status,
                ..
            } => {
                info!(payment_id, %old_status, %new_status, "payment status changed");
            }
            Event::OrderCreated { .. }
            | Event::PaymentCreated { .. }
            | Event::PaymentRefunded { .. }
            | Event::CartCleared { .. } => {}
        }
    }

    info!("Event processing loop stopped");
}
