//! Storefront order and payment lifecycle.
//!
//! Orders are built from a cart snapshot and moved through their state
//! machine by [`services::OrderService`]; payments are created, routed by
//! method and settled by [`services::PaymentService`].
//! [`services::CheckoutService`] ties the two together.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod money;
pub mod notifications;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
