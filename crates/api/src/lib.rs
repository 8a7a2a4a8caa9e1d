// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! MedComply API Library
//!
//! HTTP surface for the billing service: the Stripe webhook endpoint,
//! checkout and billing portal sessions, dependency health and client
//! error reports.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod reporting;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
