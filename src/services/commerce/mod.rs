//! Collaborators the checkout depends on, and the checkout itself.

pub mod cart;
pub mod catalog;
pub mod checkout;

pub use cart::{CartLine, CartProvider, InMemoryCart};
pub use catalog::{InMemoryCatalog, ProductCatalog, ProductSnapshot};
pub use checkout::{CheckoutRequest, CheckoutResult, CheckoutService};
