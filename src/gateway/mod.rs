//! HTTP surface of the authentication gateway.
//!
//! Routes:
//! - `GET /login` → redirect (307) to the IdP with a signed state token
//! - `GET /callback` → finish the login, set cookies, redirect (303) back
//! - `GET|POST|DELETE /api-token` → list, create and delete named API tokens
//! - anything else → verify the request's token: 200 "Authorized" or
//!   401 "Unauthorized"
//!
//! The verify fallback is what a reverse proxy calls (e.g. as an external
//! auth endpoint) before letting a request through to the application.

use crate::codec::TokenCodec;
use crate::oauth::OAuth2Adapter;
use crate::tokenstore::TokenStore;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

pub mod authorize;
pub mod handlers;


pub use authorize::{authorize, AuthError, AuthorizedUser};

/// Cookie carrying the bearer token
pub const DEFAULT_TOKEN_COOKIE: &str = "auth-gateway-token";

/// Cookie carrying the name the session token is stored under
pub const DEFAULT_SESSION_COOKIE: &str = "auth-gateway-session";

/// Name a user's browser session token is stored under. There is one
/// per user; a new login replaces the previous session.
pub fn session_token_name(user_id: &str) -> String {
    format!("_session_{}", user_id)
}

/// Shared state for the gateway handlers
pub struct GatewayState {
    pub store: Arc<dyn TokenStore>,
    pub codec: Arc<TokenCodec>,
    pub oauth: Arc<dyn OAuth2Adapter>,

    /// Request refresh tokens with the `offline_access` scope rather than
    /// `access_type=offline`. Fixed at startup from provider discovery.
    pub offline_as_scope: bool,

    /// Forget a user's credential when refreshing it fails, forcing a new login
    pub invalidate_on_refresh_failure: bool,

    pub token_cookie: String,
    pub session_cookie: String,
}

impl GatewayState {
    pub fn new(
        store: Arc<dyn TokenStore>,
        codec: Arc<TokenCodec>,
        oauth: Arc<dyn OAuth2Adapter>,
    ) -> Self {
        Self {
            store,
            codec,
            oauth,
            offline_as_scope: true,
            invalidate_on_refresh_failure: false,
            token_cookie: DEFAULT_TOKEN_COOKIE.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
        }
    }

    pub fn with_offline_as_scope(mut self, offline_as_scope: bool) -> Self {
        self.offline_as_scope = offline_as_scope;
        self
    }

    pub fn with_invalidate_on_refresh_failure(mut self, invalidate: bool) -> Self {
        self.invalidate_on_refresh_failure = invalidate;
        self
    }

    pub fn with_cookie_names(mut self, token_cookie: &str, session_cookie: &str) -> Self {
        self.token_cookie = token_cookie.to_string();
        self.session_cookie = session_cookie.to_string();
        self
    }
}

/// Create the gateway router
pub fn create_gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback))
        .route(
            "/api-token",
            get(handlers::list_api_tokens)
                .post(handlers::create_api_token)
                .delete(handlers::delete_api_token),
        )
        .fallback(handlers::verify)
        .with_state(Arc::new(state))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for gateway endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        if err.is_internal() {
            AppError::ServerError(err.to_string())
        } else {
            AppError::Unauthorized(err.to_string())
        }
    }
}
