// Bearer token extraction from requests
pub mod auth;

// Signed tokens and their claims
pub mod codec;

// Configuration loading
pub mod config;

// OAuth credentials held per user
pub mod credentials;

// HTTP handlers and the authorization state machine
pub mod gateway;

// OAuth / OpenID Connect client
pub mod oauth;

// Durable backends for token state
pub mod persistence;

// Token ↔ user ↔ credential store
pub mod tokenstore;
