//! COD import polling engine
//!
//! Drives the three polling loops of a COD query (status, identifiers,
//! record details) plus the active-imports watcher, on behalf of each
//! signed-in browser session.

pub mod active_imports;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod view;

pub use registry::SessionRegistry;
pub use session::CodSession;
pub use source::CodSource;
pub use view::{CodView, IdPhase};
