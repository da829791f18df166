//! Ticket Market checkout core
//!
//! Pricing, seat reservation, loyalty points and the settlement lifecycle of
//! ticket orders, on top of a transactional relational store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod notifications;
pub mod services;

pub use api::TicketingCore;
pub use errors::{ErrorKind, ServiceError};
pub use services::checkout::{CheckoutRequest, TransactionDetails};
pub use services::pricing::CartLine;
