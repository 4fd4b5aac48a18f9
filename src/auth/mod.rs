use axum::http::{header, HeaderMap};

#[cfg(test)]
mod tests;

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Extract a token from the named cookie
///
/// Every `Cookie` header is searched; the first cookie called `name` wins.
pub fn extract_cookie_token(headers: &HeaderMap, name: &str) -> Result<String, TokenError> {
    let value = find_cookie(headers, name).ok_or(TokenError::Missing)?;

    if value.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(value.to_string())
}

/// Extract the token a request authenticates with
///
/// The Authorization header wins over the cookie: a header is set
/// deliberately for one request, while a cookie just sticks around.
pub fn extract_request_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, TokenError> {
    match extract_bearer_token(headers) {
        Ok(token) => Ok(token),
        Err(header_error) => extract_cookie_token(headers, cookie_name).map_err(|cookie_error| {
            // Report the more specific of the two failures
            if header_error == TokenError::Missing {
                cookie_error
            } else {
                header_error
            }
        }),
    }
}

fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// Parse bearer token from Authorization header value
///
/// Internal helper for extract_bearer_token
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    // Expect "Bearer <token>"
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();

    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Neither an Authorization header nor the cookie is present
    Missing,
    /// Invalid format (not "Bearer <token>")
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}
