//! # Braggly Common Library
//!
//! Shared code for the Braggly gateway including:
//! - Configuration loading
//! - Wire types exchanged with the Braggly backend
//! - Stripe webhook signature verification
//! - COD import event types and the event bus
//! - ETA / human time helpers

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod sse;

pub use error::{Error, Result};
