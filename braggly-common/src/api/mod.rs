//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Wire types exchanged with the Braggly backend and the browser
//!
//! The gateway wraps these with axum extractors and middleware.

pub mod auth;
pub mod types;

pub use auth::{
    bearer_token, compute_stripe_signature, verify_stripe_signature, SignatureError,
    StripeSignature, STRIPE_TOLERANCE_SECS,
};
pub use types::*;
