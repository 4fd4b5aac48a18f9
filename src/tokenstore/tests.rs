use super::*;
use crate::codec::TokenCodec;
use crate::persistence::MemorySecretBackend;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TEST_SECRET: &[u8] = b"tokenstore-test-secret";

fn codec() -> Arc<TokenCodec> {
    Arc::new(TokenCodec::new(TEST_SECRET))
}

fn credential(access_token: &str) -> OAuthCredential {
    OAuthCredential {
        access_token: access_token.to_string(),
        token_type: "Bearer".to_string(),
        refresh_token: Some("refresh".to_string()),
        expiry: None,
    }
}

/// Both store flavours must behave identically
async fn stores() -> Vec<(&'static str, Arc<dyn TokenStore>)> {
    let persisted =
        PersistedTokenStore::open(codec(), Arc::new(MemorySecretBackend::new())).await;
    vec![
        ("memory", Arc::new(InMemoryTokenStore::new(codec())) as Arc<dyn TokenStore>),
        ("persisted", Arc::new(persisted) as Arc<dyn TokenStore>),
    ]
}

fn expiry_of(token: &str) -> DateTime<Utc> {
    let claims: ApiTokenClaims = codec().verify(token).unwrap();
    DateTime::from_timestamp(claims.exp.unwrap(), 0).unwrap()
}

#[tokio::test]
async fn test_store_then_lookup() {
    for (kind, store) in stores().await {
        store.store_api_token("laptop", "tok-1", "alice").unwrap();

        assert!(store.contains_api_token("laptop"), "{}", kind);
        assert_eq!(store.user_for_token("tok-1").unwrap(), "alice", "{}", kind);
        assert_eq!(store.api_token_names(), vec!["laptop".to_string()], "{}", kind);
    }
}

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    for (kind, store) in stores().await {
        assert!(
            matches!(store.user_for_token("nope"), Err(StoreError::TokenNotFound)),
            "{}",
            kind
        );
    }
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    for (kind, store) in stores().await {
        assert!(!store.has_user_credentials("alice"), "{}", kind);
        assert!(
            matches!(store.token_for_user("alice"), Err(StoreError::UserNotFound(_))),
            "{}",
            kind
        );
    }
}

#[tokio::test]
async fn test_delete_keeps_user_credential() {
    for (kind, store) in stores().await {
        store.store_user("alice", credential("access")).unwrap();
        store.store_api_token("laptop", "tok-1", "alice").unwrap();
        store.delete_api_token("laptop").unwrap();

        assert!(!store.contains_api_token("laptop"), "{}", kind);
        assert!(store.user_for_token("tok-1").is_err(), "{}", kind);
        assert!(store.has_user_credentials("alice"), "{}", kind);
    }
}

#[tokio::test]
async fn test_delete_missing_name_is_ok() {
    for (kind, store) in stores().await {
        assert!(store.delete_api_token("never-existed").is_ok(), "{}", kind);
    }
}

#[tokio::test]
async fn test_store_user_replaces_credential() {
    for (kind, store) in stores().await {
        store.store_user("alice", credential("first")).unwrap();
        store.store_user("alice", credential("second")).unwrap();

        let stored = store.token_for_user("alice").unwrap().unwrap();
        assert_eq!(stored.access_token, "second", "{}", kind);
    }
}

#[tokio::test]
async fn test_invalidate_user() {
    for (kind, store) in stores().await {
        store.store_user("alice", credential("access")).unwrap();
        store.store_api_token("laptop", "tok-1", "alice").unwrap();
        store.invalidate_user("alice").unwrap();

        assert!(!store.has_user_credentials("alice"), "{}", kind);
        // Tokens still resolve to the user; authorization fails on the credential
        assert_eq!(store.user_for_token("tok-1").unwrap(), "alice", "{}", kind);
        assert!(store.invalidate_user("alice").is_ok(), "{}", kind);
    }
}

#[tokio::test]
async fn test_session_name_overwrite_drops_old_token() {
    for (kind, store) in stores().await {
        store.store_api_token("_session_alice", "tok-old", "alice").unwrap();
        store.store_api_token("_session_alice", "tok-new", "alice").unwrap();

        assert!(store.user_for_token("tok-old").is_err(), "{}", kind);
        assert_eq!(store.user_for_token("tok-new").unwrap(), "alice", "{}", kind);
        assert_eq!(store.api_token_names().len(), 1, "{}", kind);
    }
}

#[tokio::test]
async fn test_generated_tokens_carry_claims() {
    for (kind, store) in stores().await {
        let token = store.generate_api_token("alice", "alice@example.com").unwrap();
        let claims: ApiTokenClaims = codec().verify(&token).unwrap();

        assert_eq!(claims.sub, "alice", "{}", kind);
        assert_eq!(claims.email, "alice@example.com", "{}", kind);
    }
}

#[tokio::test]
async fn test_session_token_lives_one_hour() {
    for (kind, store) in stores().await {
        let before = Utc::now();
        let token = store.generate_session_token("alice", "").unwrap();
        let expires_in = expiry_of(&token) - before;

        assert!(expires_in >= Duration::seconds(SESSION_TOKEN_LIFETIME_SECONDS - 5), "{}", kind);
        assert!(expires_in <= Duration::seconds(SESSION_TOKEN_LIFETIME_SECONDS + 5), "{}", kind);
    }
}

#[tokio::test]
async fn test_api_token_lives_a_century() {
    for (kind, store) in stores().await {
        let token = store.generate_api_token("alice", "").unwrap();
        let expires_in = expiry_of(&token) - Utc::now();

        assert!(expires_in > Duration::days(365 * 99), "{}", kind);
    }
}

#[tokio::test]
async fn test_generated_tokens_differ() {
    for (kind, store) in stores().await {
        let first = store.generate_api_token("alice", "").unwrap();
        let second = store.generate_api_token("alice", "").unwrap();
        assert_ne!(first, second, "{}", kind);
    }
}

/// Signs the same token for the first `repeats` calls, then distinct ones
struct RepeatingSigner {
    calls: AtomicUsize,
    repeats: usize,
}

impl TokenSigner for RepeatingSigner {
    fn sign_api_token(&self, _claims: &ApiTokenClaims) -> Result<String, CodecError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.repeats {
            Ok("tok-fixed".to_string())
        } else {
            Ok(format!("tok-{}", call))
        }
    }
}

#[tokio::test]
async fn test_colliding_token_is_never_returned() {
    let signer = Arc::new(RepeatingSigner {
        calls: AtomicUsize::new(0),
        repeats: 3,
    });
    let memory = InMemoryTokenStore::new(signer.clone());
    memory.store_api_token("existing", "tok-fixed", "bob").unwrap();

    let token = memory.generate_api_token("alice", "").unwrap();
    assert_ne!(token, "tok-fixed");
    assert_eq!(signer.calls.load(Ordering::SeqCst), 4);

    let signer = Arc::new(RepeatingSigner {
        calls: AtomicUsize::new(0),
        repeats: 2,
    });
    let persisted =
        PersistedTokenStore::open(signer.clone(), Arc::new(MemorySecretBackend::new())).await;
    persisted.store_api_token("existing", "tok-fixed", "bob").unwrap();

    let token = persisted.generate_session_token("alice", "").unwrap();
    assert_ne!(token, "tok-fixed");
    assert_eq!(signer.calls.load(Ordering::SeqCst), 3);
    persisted.shutdown().await;
}

struct FailingSigner;

impl TokenSigner for FailingSigner {
    fn sign_api_token(&self, _claims: &ApiTokenClaims) -> Result<String, CodecError> {
        Err(CodecError::Signing("no key".to_string()))
    }
}

#[test]
fn test_signing_failure_propagates() {
    let store = InMemoryTokenStore::new(Arc::new(FailingSigner));
    assert!(matches!(
        store.generate_api_token("alice", ""),
        Err(StoreError::Signing(_))
    ));
}

#[test]
fn test_concurrent_mutations() {
    let store = Arc::new(InMemoryTokenStore::new(codec()));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    let user = format!("user-{}", worker);
                    let token = store.generate_api_token(&user, "").unwrap();
                    store
                        .store_api_token(&format!("{}-{}", user, i), &token, &user)
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.api_token_names().len(), 200);
}
