//! HTTP API handlers for braggly-web

pub mod admin;
pub mod auth;
pub mod cod;
pub mod credits;
pub mod gate;
pub mod health;
pub mod i18n;
pub mod payments;
pub mod session;
pub mod ui;
pub mod xrd;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use cod::cod_routes;
pub use credits::credit_routes;
pub use gate::gate_middleware;
pub use health::health_routes;
pub use i18n::i18n_routes;
pub use payments::payment_routes;
pub use session::SessionToken;
pub use ui::page_routes;
pub use xrd::xrd_routes;
