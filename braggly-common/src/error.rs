//! Start-up errors of the Braggly gateway
//!
//! Only configuration resolution fails through this type. Request-time
//! failures have their own enums in `braggly-web` (backend, OAuth,
//! payments, translations).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The TOML file exists but could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML, a missing backend URL or an unparsable override
    #[error("Configuration error: {0}")]
    Config(String),
}
