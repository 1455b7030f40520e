//! Order and payment engines plus the checkout orchestration.

pub mod commerce;
pub mod order_status;
pub mod orders;
pub mod payment_expiry;
pub mod payment_gateway;
pub mod payments;

pub use commerce::checkout::CheckoutService;
pub use order_status::OrderStatusService;
pub use orders::OrderService;
pub use payment_expiry::PaymentExpiryWorker;
pub use payment_gateway::{GatewayClient, SimulatedGateway};
pub use payments::PaymentService;

/// Appends `note` on a new line of the free-text notes column.
pub(crate) fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing.filter(|n| !n.is_empty()) {
        Some(existing) => format!("{}\n{}", existing, note),
        None => note.to_string(),
    }
}
