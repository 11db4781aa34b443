//! Braggly backend access

mod client;
mod error;

pub use client::{AuthedBackend, BackendClient};
pub use error::BackendError;
