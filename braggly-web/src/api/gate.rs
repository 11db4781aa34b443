//! Role-based gate for the page routes (`/`, `/user/*`, `/admin/*`)
//!
//! Signed-out visitors may only see `/`. A signed-in user is steered to the
//! dashboard of their role. On every gated request with a valid token the
//! `Role` and `Balance` cookies are refreshed from `/api/whoami`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use braggly_common::api::{Role, WhoAmI};
use tracing::{debug, warn};

use super::session::{
    site_cookie, SessionToken, BALANCE_COOKIE, FREE_ACCESS_COOKIE, ROLE_COOKIE,
};
use crate::AppState;

const FREE_ACCESS_PARAMETER: &str = "free_access";

/// Outcome of the gate for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Redirect(&'static str),
}

fn is_under(path: &str, prefix: &str) -> bool {
    path.starts_with(prefix)
}

/// Decide what happens to a page request
///
/// `role` is `None` when there is no token or the backend rejected it.
///
/// ```
/// use braggly_common::api::Role;
/// use braggly_web::api::gate::{gate_decision, GateDecision};
///
/// assert_eq!(gate_decision("/admin/users", None), GateDecision::Redirect("/"));
/// assert_eq!(gate_decision("/", Some(Role::Admin)), GateDecision::Redirect("/admin"));
/// assert_eq!(gate_decision("/user/files", Some(Role::User)), GateDecision::Pass);
/// ```
pub fn gate_decision(path: &str, role: Option<Role>) -> GateDecision {
    match role {
        None => {
            if is_under(path, "/user") || is_under(path, "/admin") {
                GateDecision::Redirect("/")
            } else {
                GateDecision::Pass
            }
        }
        Some(Role::User) => {
            if is_under(path, "/admin") || path == "/" {
                GateDecision::Redirect("/user")
            } else {
                GateDecision::Pass
            }
        }
        Some(Role::Admin) => {
            if is_under(path, "/user") || path == "/" {
                GateDecision::Redirect("/admin")
            } else {
                GateDecision::Pass
            }
        }
        Some(Role::Unknown) => GateDecision::Pass,
    }
}

/// Gate middleware for the page routes
pub async fn gate_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let (parts, body) = request.into_parts();
    let token = SessionToken::from_parts(&parts);
    let request = Request::from_parts(parts, body);

    let who: Option<WhoAmI> = match &token {
        Some(SessionToken(token)) => match state.backend.with_token(token.clone()).whoami().await {
            Ok(who) => Some(who),
            Err(e) => {
                warn!(path = %path, "Gate: token rejected: {}", e);
                None
            }
        },
        None => None,
    };

    let decision = gate_decision(&path, who.as_ref().map(|w| w.role));
    debug!(path = %path, ?decision, "Gate decision");

    let Some(who) = who else {
        return match decision {
            GateDecision::Redirect(to) => Redirect::to(to).into_response(),
            GateDecision::Pass => next.run(request).await,
        };
    };

    let mut jar = jar
        .add(site_cookie(ROLE_COOKIE, who.role.as_str()))
        .add(site_cookie(BALANCE_COOKIE, who.balance.to_string()));

    if let GateDecision::Redirect(to) = decision {
        return (jar, Redirect::to(to)).into_response();
    }

    if who.role == Role::User && is_under(&path, "/user") {
        if let Some(SessionToken(token)) = &token {
            match state
                .backend
                .with_token(token.clone())
                .bool_parameter(FREE_ACCESS_PARAMETER)
                .await
            {
                Ok(parameter) => {
                    jar = jar.add(site_cookie(FREE_ACCESS_COOKIE, parameter.value.to_string()));
                }
                Err(e) => warn!("Gate: could not read {}: {}", FREE_ACCESS_PARAMETER, e),
            }
        }
    }

    (jar, next.run(request).await).into_response()
}
