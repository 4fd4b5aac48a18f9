use crate::codec::{unverified_claims, IdTokenClaims, StateClaims};
use crate::oauth::{login_scopes, AuthCodeOptions};
use axum::{
    extract::{Form, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse, Json, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{authorize, session_token_name, AppError, GatewayState};

/// Shown with a freshly created API token, which is never displayed again
pub const API_TOKEN_WARNING: &str = "Please make sure to store this API token securely, you won't be able to see it again after you leave this page.";

/// `/login` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    /// Where to send the browser once logged in
    rd: Option<String>,
    /// Space separated scopes to request on top of the defaults
    extra_scopes: Option<String>,
    /// Space separated client IDs the ID token should also be valid for
    cross_client: Option<String>,
}

/// `/callback` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `name` of an API token, from the query string or a form body
#[derive(Debug, Default, Deserialize)]
pub struct NameParams {
    name: Option<String>,
}

/// Form body wins over query string
fn token_name(query: NameParams, form: Option<Form<NameParams>>) -> String {
    form.and_then(|Form(form)| form.name)
        .or(query.name)
        .unwrap_or_default()
}

/// Fallback: 200 if the request carries a usable token, 401 otherwise
pub async fn verify(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    match authorize(&state, &headers).await {
        Ok(user) => {
            debug!(user = %user.user_id, "Request authorized");
            (StatusCode::OK, "Authorized").into_response()
        }
        Err(e) => {
            debug!(reason = %e, "Request not authorized");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// GET /login
///
/// Redirects the browser to the IdP. The post-login destination travels in
/// a signed state token that expires after five minutes.
pub async fn login(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<LoginParams>,
) -> Result<Redirect, AppError> {
    let rd = params
        .rd
        .filter(|rd| !rd.is_empty())
        .unwrap_or_else(|| "/".to_string());

    let state_token = state.codec.mint(&StateClaims::issue(&rd)).map_err(|e| {
        error!(error = %e, "Failed to sign state token");
        AppError::ServerError(format!("Failed to create login request: {}", e))
    })?;

    let scopes = login_scopes(
        params.extra_scopes.as_deref().unwrap_or_default(),
        params.cross_client.as_deref().unwrap_or_default(),
        state.offline_as_scope,
    );
    let options = AuthCodeOptions {
        access_type_offline: !state.offline_as_scope,
    };

    let auth_url = state.oauth.auth_code_url(&state_token, &scopes, &options);

    debug!(rd = %rd, scopes = ?scopes, "Redirecting to identity provider");
    Ok(Redirect::temporary(&auth_url))
}

/// GET /callback
///
/// Completes the login: checks the state token, trades the code for tokens,
/// registers a session token for the user and hands it to the browser as a
/// cookie. Cookies are only set when every step succeeds.
pub async fn callback(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Identity provider returned an error");
        return Err(AppError::BadRequest(format!(
            "Authorization failed: {} - {}",
            error, description
        )));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let state_token = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    // Check the state before spending the code
    let state_claims: StateClaims = state.codec.verify(&state_token).map_err(|e| {
        warn!(error = %e, "Invalid state token on callback");
        AppError::BadRequest(format!("Invalid state token: {}", e))
    })?;
    if state_claims.is_expired_at(Utc::now()) {
        warn!("Expired state token on callback");
        return Err(AppError::BadRequest("State token has expired, please log in again".to_string()));
    }
    if state_claims.rd.is_empty() {
        return Err(AppError::BadRequest("No rd claim present in state token".to_string()));
    }
    let location = HeaderValue::from_str(&state_claims.rd)
        .map_err(|_| AppError::BadRequest("Invalid redirect URL in state token".to_string()))?;

    let response = state.oauth.exchange_code(&code).await.map_err(|e| {
        error!(error = %e, "Authorization code exchange failed");
        AppError::BadRequest(format!("Failed to exchange authorization code: {}", e))
    })?;

    let id_token = response
        .id_token
        .ok_or_else(|| AppError::BadRequest("No id_token in token response".to_string()))?;

    // The ID token came straight from the token endpoint, not the browser
    let id_claims: IdTokenClaims = unverified_claims(&id_token).map_err(|e| {
        warn!(error = %e, "Unreadable ID token");
        AppError::BadRequest(format!("Error parsing ID token: {}", e))
    })?;
    let user_id = id_claims
        .sub
        .filter(|sub| !sub.is_empty())
        .ok_or_else(|| AppError::BadRequest("No subject in ID token".to_string()))?;
    let email = id_claims
        .email
        .ok_or_else(|| AppError::BadRequest("No email in ID token".to_string()))?;

    let session_token = state
        .store
        .generate_session_token(&user_id, &email)
        .map_err(|e| {
            error!(user = %user_id, error = %e, "Failed to generate session token");
            AppError::ServerError(format!("Error generating session token: {}", e))
        })?;

    let session_name = session_token_name(&user_id);
    if let Err(e) = state.store.store_api_token(&session_name, &session_token, &user_id) {
        error!(user = %user_id, error = %e, "Failed to store session token");
        if let Err(delete_err) = state.store.delete_api_token(&session_name) {
            warn!(
                user = %user_id,
                store_error = %e,
                deletion_error = %delete_err,
                "Storing session token failed, and so did removing it"
            );
        }
        return Err(AppError::ServerError(format!("Error storing session token: {}", e)));
    }

    // Newer than anything stored, so always replace
    state
        .store
        .store_user(&user_id, response.credential)
        .map_err(|e| {
            error!(user = %user_id, error = %e, "Failed to store user credentials");
            AppError::ServerError(format!("Error storing user credentials: {}", e))
        })?;

    info!(user = %user_id, "User logged in");

    Ok((
        StatusCode::SEE_OTHER,
        [(header::LOCATION, location)],
        AppendHeaders([
            (
                header::SET_COOKIE,
                format!("{}={}; Path=/", state.token_cookie, session_token),
            ),
            (
                header::SET_COOKIE,
                format!("{}={}; Path=/", state.session_cookie, session_name),
            ),
        ]),
    )
        .into_response())
}

/// GET /api-token
pub async fn list_api_tokens(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(json!({
        "tokens": state.store.api_token_names(),
    }))
}

/// POST /api-token
///
/// Creates a long-lived token for the user the request is authorized as.
/// The token value is returned here once and never again.
pub async fn create_api_token(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<NameParams>,
    form: Option<Form<NameParams>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let name = token_name(query, form).trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "name parameter missing. Please specify the name of the API token you wish to create"
                .to_string(),
        ));
    }

    if state.store.contains_api_token(&name) {
        return Err(AppError::BadRequest(format!("API token {} already exists", name)));
    }

    let user = authorize(&state, &headers).await.map_err(|e| {
        debug!(name = %name, reason = %e, "Unauthorized API token request");
        AppError::from(e)
    })?;

    let api_token = state
        .store
        .generate_api_token(&user.user_id, &user.email)
        .map_err(|e| {
            error!(user = %user.user_id, error = %e, "Failed to generate API token");
            AppError::ServerError(format!("Error generating API token: {}", e))
        })?;

    if let Err(e) = state.store.store_api_token(&name, &api_token, &user.user_id) {
        error!(user = %user.user_id, name = %name, error = %e, "Failed to store API token");
        if let Err(delete_err) = state.store.delete_api_token(&name) {
            warn!(
                name = %name,
                store_error = %e,
                deletion_error = %delete_err,
                "Storing API token failed, and so did removing it"
            );
        }
        return Err(AppError::ServerError(format!("Error storing new API token: {}", e)));
    }

    info!(user = %user.user_id, name = %name, "API token created");

    Ok(Json(json!({
        "api_token": api_token,
        "token_name": name,
        "warning": API_TOKEN_WARNING,
    })))
}

/// DELETE /api-token
///
/// Succeeds whether or not the name exists.
pub async fn delete_api_token(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<NameParams>,
    form: Option<Form<NameParams>>,
) -> Result<String, AppError> {
    let name = token_name(query, form);
    if name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "name parameter missing. Please specify the name of the API token you wish to delete"
                .to_string(),
        ));
    }

    state.store.delete_api_token(&name).map_err(|e| {
        error!(name = %name, error = %e, "Failed to delete API token");
        AppError::ServerError(format!("Error deleting API token: {}", e))
    })?;

    info!(name = %name, "API token deleted");
    Ok(format!("API token {} successfully deleted (if it existed)", name))
}
