//! Authentication: password hashing, session tokens, and the request gate.
//!
//! Provides:
//! - Hashing and verifying login credentials
//! - Issuing and verifying signed, time-limited session tokens
//! - The GraphQL handler that attaches identity (or nothing) to each request
//!   before resolvers run

use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_graphql::{Context, Request, Response};
use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};

use crate::dataloaders::Loaders;
use crate::schema::AppSchema;
use crate::store::EntityStore;

/// Hash a plaintext password into a PHC string for storage.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|_| password_hash::Error::Crypto)?;
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok(phc)
}

/// Check a plaintext password against a stored PHC hash. An unparseable
/// stored hash counts as a mismatch.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Signed claims embedded in every session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

/// Identity attached to a request once its bearer token checks out.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: ObjectId,
    pub email: String,
}

/// Issues and verifies session tokens. Secret and validity window come from
/// configuration at startup.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    validity_seconds: u64,
}

impl TokenCodec {
    pub fn new(secret: String, validity_seconds: u64) -> Self {
        Self {
            secret,
            validity_seconds,
        }
    }

    pub fn validity_hours(&self) -> i32 {
        (self.validity_seconds / 3600) as i32
    }

    /// Produce a signed token asserting `user_id`/`email` for the configured
    /// validity window.
    pub fn issue(
        &self,
        user_id: ObjectId,
        email: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id.to_hex(),
            email: email.to_owned(),
            exp: (Utc::now() + Duration::seconds(self.validity_seconds as i64)).timestamp()
                as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    /// Decode and validate a token. Malformed, unsigned, and expired tokens
    /// all come back `None`; callers treat that as anonymous, never as an
    /// error to surface.
    pub fn verify(&self, token: &str) -> Option<AuthSession> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;
        let user_id = ObjectId::parse_str(&data.claims.sub).ok()?;
        Some(AuthSession {
            user_id,
            email: data.claims.email,
        })
    }
}

/// Extract the bearer token from the Authorization header, if any.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// GraphQL endpoint handler doubling as the auth gate.
///
/// Runs once per incoming request, before resolver dispatch: builds a fresh
/// loader set, attempts token verification, and injects the identity into
/// the request context when it succeeds. A missing or rejected token does
/// not block the request - authorization is deferred to each resolver.
pub async fn graphql_handler(
    Extension(schema): Extension<AppSchema>,
    Extension(codec): Extension<TokenCodec>,
    Extension(store): Extension<Arc<dyn EntityStore>>,
    headers: HeaderMap,
    req: Json<Request>,
) -> Json<Response> {
    let mut request = req.0.data(Loaders::new(store));

    let session = extract_bearer(&headers).and_then(|token| codec.verify(token));
    tracing::debug!(authenticated = session.is_some(), "graphql request");
    if let Some(session) = session {
        request = request.data(session);
    }

    Json(schema.execute(request).await)
}

/// Current identity, if the request carried a valid token.
pub fn session<'a>(ctx: &'a Context<'_>) -> Option<&'a AuthSession> {
    ctx.data_opt::<AuthSession>()
}

/// Authenticated identity, or the "Unauthenticated" domain error.
pub fn require_session<'a>(ctx: &'a Context<'_>) -> async_graphql::Result<&'a AuthSession> {
    session(ctx).ok_or_else(|| async_graphql::Error::new("Unauthenticated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret".to_string(), 3600)
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "hunter2"));
    }

    #[test]
    fn test_token_roundtrip() {
        let codec = codec();
        let user_id = ObjectId::new();

        let token = codec.issue(user_id, "a@b.c").unwrap();
        let session = codec.verify(&token).unwrap();

        assert_eq!(session.user_id, user_id);
        assert_eq!(session.email, "a@b.c");
    }

    #[test]
    fn test_token_with_wrong_secret_degrades_to_anonymous() {
        let token = codec().issue(ObjectId::new(), "a@b.c").unwrap();
        let other = TokenCodec::new("other-secret".to_string(), 3600);
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn test_malformed_token_degrades_to_anonymous() {
        assert!(codec().verify("definitely not a jwt").is_none());
    }

    #[test]
    fn test_expired_token_degrades_to_anonymous() {
        let codec = codec();
        // two hours stale, well past the default validation leeway
        let claims = Claims {
            sub: ObjectId::new().to_hex(),
            email: "a@b.c".to_string(),
            exp: (Utc::now() - Duration::hours(2)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("test-secret".as_bytes()),
        )
        .unwrap();

        assert!(codec.verify(&token).is_none());
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("Authorization", "tok123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("Authorization", "Bearer tok123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("tok123"));
    }
}
