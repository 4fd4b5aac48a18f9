//! OAuth client for a discovered OpenID Connect provider.
//!
//! Client credentials are sent in the form body (`client_secret_post`).

use crate::credentials::OAuthCredential;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{AuthCodeOptions, OAuth2Adapter, OAuthError, ProviderMetadata, TokenResponse};

/// Standard OAuth 2.0 token endpoint response, plus the OIDC ID token
#[derive(Deserialize, Debug)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

impl TokenEndpointResponse {
    fn into_credential(self) -> (OAuthCredential, Option<String>) {
        let credential = OAuthCredential {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_default(),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expiry: self
                .expires_in
                .filter(|seconds| *seconds > 0)
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        };
        (credential, self.id_token.filter(|t| !t.is_empty()))
    }
}

pub struct OidcClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorization_endpoint: String,
    token_endpoint: String,
    debug: bool,
}

impl OidcClient {
    pub fn new(
        http: reqwest::Client,
        provider: &ProviderMetadata,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Self {
        Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            authorization_endpoint: provider.authorization_endpoint.clone(),
            token_endpoint: provider.token_endpoint.clone(),
            debug: false,
        }
    }

    /// Log every token endpoint response status
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenEndpointResponse, OAuthError> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if self.debug {
            debug!(status = %status, endpoint = %self.token_endpoint, "Token endpoint responded");
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OAuthError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| OAuthError::Parse(format!("token response: {}", e)))
    }
}

#[async_trait]
impl OAuth2Adapter for OidcClient {
    fn auth_code_url(&self, state: &str, scopes: &[String], options: &AuthCodeOptions) -> String {
        let separator = if self.authorization_endpoint.contains('?') {
            '&'
        } else {
            '?'
        };

        let mut url = format!("{}{}", self.authorization_endpoint, separator);
        if options.access_type_offline {
            url.push_str("access_type=offline&");
        }
        url.push_str(&format!(
            "client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
            urlencoding::encode(state)
        ));
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OAuthError> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await?;

        debug!(
            has_refresh_token = response.refresh_token.is_some(),
            has_id_token = response.id_token.is_some(),
            expires_in = ?response.expires_in,
            "Authorization code exchanged"
        );

        let (credential, id_token) = response.into_credential();
        Ok(TokenResponse {
            credential,
            id_token,
        })
    }

    /// The refresh token is carried over when the provider doesn't rotate it
    async fn refresh(&self, credential: &OAuthCredential) -> Result<OAuthCredential, OAuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(OAuthError::NoRefreshToken)?;

        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await?;

        let (mut refreshed, _) = response.into_credential();
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.to_string());
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> OidcClient {
        let provider = ProviderMetadata {
            issuer: server.url(),
            authorization_endpoint: format!("{}/auth", server.url()),
            token_endpoint: format!("{}/token", server.url()),
            scopes_supported: vec![],
        };
        OidcClient::new(
            reqwest::Client::new(),
            &provider,
            "gateway",
            "s3cret",
            "http://127.0.0.1:5555/callback",
        )
    }

    fn expired_credential(refresh_token: Option<&str>) -> OAuthCredential {
        OAuthCredential {
            access_token: "old-access".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expiry: Some(Utc::now() - Duration::minutes(1)),
        }
    }

    #[tokio::test]
    async fn test_auth_code_url() {
        let server = Server::new_async().await;
        let scopes = vec!["openid".to_string(), "email".to_string()];

        let url = client(&server).auth_code_url("state-token", &scopes, &AuthCodeOptions::default());

        assert!(url.starts_with(&format!("{}/auth?", server.url())));
        assert!(url.contains("client_id=gateway"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A5555%2Fcallback"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("state=state-token"));
        assert!(!url.contains("access_type"));
    }

    #[tokio::test]
    async fn test_auth_code_url_offline_access_type() {
        let server = Server::new_async().await;
        let options = AuthCodeOptions {
            access_type_offline: true,
        };

        let url = client(&server).auth_code_url("s", &[], &options);
        assert!(url.contains("?access_type=offline&client_id=gateway"));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("client_id".into(), "gateway".into()),
                Matcher::UrlEncoded("client_secret".into(), "s3cret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token": "access", "token_type": "bearer", "refresh_token": "refresh",
                    "expires_in": 3600, "id_token": "a.b.c"}"#,
            )
            .create_async()
            .await;

        let response = client(&server).exchange_code("the-code").await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.id_token.as_deref(), Some("a.b.c"));
        assert_eq!(response.credential.access_token, "access");
        assert_eq!(response.credential.refresh_token.as_deref(), Some("refresh"));
        assert!(!response.credential.is_expired());
        assert!(response.credential.is_expired_at(Utc::now() + Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_exchange_code_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let result = client(&server).exchange_code("bad").await;
        match result {
            Err(OAuthError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.id_token)),
        }
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token": "new-access", "expires_in": 600}"#)
            .create_async()
            .await;

        let refreshed = client(&server)
            .refresh(&expired_credential(Some("refresh-1")))
            .await
            .unwrap();

        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!refreshed.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_takes_rotated_refresh_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token": "new-access", "refresh_token": "refresh-2"}"#)
            .create_async()
            .await;

        let refreshed = client(&server)
            .refresh(&expired_credential(Some("refresh-1")))
            .await
            .unwrap();

        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(refreshed.expiry, None);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let server = Server::new_async().await;

        let result = client(&server).refresh(&expired_credential(None)).await;
        assert!(matches!(result, Err(OAuthError::NoRefreshToken)));
    }
}
