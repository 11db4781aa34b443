//! Page shell routes
//!
//! Every page path serves the same single-page shell; the gate middleware
//! decides who may see which path.

use axum::{response::Html, routing::get, Router};

use crate::AppState;

const INDEX_HTML: &str = include_str!("../../ui/index.html");

/// GET /, /user/*, /admin/*
pub async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Build page routes (gated by the caller)
pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(serve_index))
        .route("/user", get(serve_index))
        .route("/user/*rest", get(serve_index))
        .route("/admin", get(serve_index))
        .route("/admin/*rest", get(serve_index))
}
