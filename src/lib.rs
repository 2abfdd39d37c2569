//! Rural Sports commerce backend
//!
//! Cart, checkout, Cashfree payment sessions and the webhook reconciliation
//! that turns a paid order into tickets, a shipping snapshot and an empty cart.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
