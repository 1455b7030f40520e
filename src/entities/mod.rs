//! Persistence entities for the order and payment lifecycle.
//!
//! Relationships are plain foreign-key columns; loading related rows is done
//! explicitly through [`crate::repositories`].

pub mod order;
pub mod order_item;
pub mod payment;
pub mod payment_method;

pub use order::{OrderStatus, ShippingAddress};
pub use payment::PaymentStatus;
pub use payment_method::PaymentMethod;

pub mod prelude {
    pub use super::order::{
        ActiveModel as OrderActiveModel, Entity as Order, Model as OrderModel,
    };
    pub use super::order_item::{
        ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
    };
    pub use super::payment::{
        ActiveModel as PaymentActiveModel, Entity as Payment, Model as PaymentModel,
    };
}
