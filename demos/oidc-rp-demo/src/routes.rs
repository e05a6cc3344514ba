use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use ras_identity_core::Session;
use ras_identity_oidc::{
    CallbackError, CallbackParams, FlowStateError, OidcError, OidcRelyingParty,
};
use ras_identity_session::SessionService;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const SESSION_COOKIE: &str = "rp_session";

/// Carries the `state` of the login this browser started
pub const LOGIN_STATE_COOKIE: &str = "rp_login_state";
const LOGIN_STATE_PATH: &str = "/callback";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relying_party: Arc<OidcRelyingParty>,
    pub sessions: Arc<SessionService>,
    pub secure_cookies: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .route("/logout", get(logout_handler))
        .route("/userinfo", get(userinfo_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn current_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    let cookie = jar.get(SESSION_COOKIE)?;
    match state.sessions.resolve_cookie(cookie.value()).await {
        Ok(session) => Some(session),
        Err(e) => {
            info!("Ignoring session cookie: {}", e);
            None
        }
    }
}

fn login_state_cookie(state: String, secure: bool) -> Cookie<'static> {
    Cookie::build((LOGIN_STATE_COOKIE, state))
        .path(LOGIN_STATE_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// The callback must return to the browser that began the login
fn state_matches(bound: Option<&str>, params: &CallbackParams) -> bool {
    matches!((bound, params.state.as_deref()), (Some(bound), Some(state)) if bound == state)
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body>
    <h1>{title}</h1>
    {body}
</body>
</html>"#
    ))
}

/// Escape text for inclusion in HTML
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn index_handler(State(state): State<AppState>, jar: CookieJar) -> Html<String> {
    match current_session(&state, &jar).await {
        Some(session) => page(
            "Signed in",
            &format!(
                r#"<p>Welcome, {}.</p><a href="/userinfo">User info</a> <a href="/logout">Sign out</a>"#,
                escape(session.claims.display_name())
            ),
        ),
        None => page("Not signed in", r#"<a href="/login">Sign in</a>"#),
    }
}

async fn login_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    match state.relying_party.start_login().await {
        Ok(redirect) => {
            let location = Redirect::to(&redirect.url);
            let jar = jar.add(login_state_cookie(redirect.state, state.secure_cookies));
            (jar, location).into_response()
        }
        Err(e) => {
            error!("Could not start login: {}", e);
            let status = match e {
                OidcError::Discovery(_) | OidcError::HttpError(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                page(
                    "Sign-in unavailable",
                    "<p>The identity provider is currently unavailable. Please try again later.</p>",
                ),
            )
                .into_response()
        }
    }
}

async fn callback_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let bound = jar
        .get(LOGIN_STATE_COOKIE)
        .map(|cookie| cookie.value().to_string());
    let jar = jar.remove(Cookie::build(LOGIN_STATE_COOKIE).path(LOGIN_STATE_PATH));

    // A provider error without state cannot create a session
    let needs_binding = params.error.is_none() || params.state.is_some();
    if needs_binding && !state_matches(bound.as_deref(), &params) {
        warn!("Callback state was not issued to this browser");
        let e = CallbackError::InvalidOrReplayedState(FlowStateError::UnknownOrExpiredState);
        return (jar, callback_failure(e)).into_response();
    }

    let session = match state.relying_party.complete_login(params).await {
        Ok(session) => session,
        Err(e) => return (jar, callback_failure(e)).into_response(),
    };

    let value = match state.sessions.issue_cookie(&session) {
        Ok(value) => value,
        Err(e) => {
            error!("Could not sign session cookie: {}", e);
            state.relying_party.logout(&session.session_id).await;
            return (jar, StatusCode::INTERNAL_SERVER_ERROR).into_response();
        }
    };

    let cookie = Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.secure_cookies);

    (jar.add(cookie), Redirect::to("/")).into_response()
}

fn callback_failure(e: CallbackError) -> Response {
    let status = match &e {
        CallbackError::Discovery(_) => StatusCode::BAD_GATEWAY,
        CallbackError::SessionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CallbackError::IdpDenied { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    };

    if e.is_server_error() {
        error!("Login failed ({:?}): {}", e.kind(), e);
    } else {
        warn!("Login failed ({:?}): {}", e.kind(), e);
    }

    let body = format!(
        r#"<p>{}</p><a href="/login">Try again</a>"#,
        escape(&e.user_message())
    );
    (status, page("Sign-in failed", &body)).into_response()
}

async fn logout_handler(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(session) = current_session(&state, &jar).await {
        state.relying_party.logout(&session.session_id).await;
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/"))
}

async fn userinfo_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(session) = current_session(&state, &jar).await else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "not_authenticated" })),
        )
            .into_response();
    };

    match state.relying_party.user_info(&session.session_id).await {
        Some(claims) => Json(claims).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
