//! Credentials, bearer tokens and the resolved acting user.
//!
//! Tokens are HS256 JWTs. A token is only accepted if its signature and
//! expiry check out, its `jti` has not been revoked and its user still
//! exists. Roles are always re-read from the store, so the `roles` claim is
//! informational for clients.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::db::{is_token_revoked, RoleSet, User};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token has been revoked")]
    Revoked,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| IdentityError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Hash on the blocking pool so request workers are not stalled
pub async fn hash_password_blocking(password: String) -> Result<String, IdentityError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| IdentityError::Hash(e.to_string()))?
}

lazy_static! {
    // Verified against when the username is unknown so both failure paths cost the same
    static ref DUMMY_HASH: Option<String> = hash_password("cellar-dummy-password").ok();
}

/// Check a username and password. Unknown users and wrong passwords are
/// indistinguishable to the caller.
pub async fn authenticate(
    db: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<User, IdentityError> {
    let user = User::find_by_username(db, username).await?;

    let hash = match &user {
        Some(user) => Some(user.password_hash.clone()),
        None => DUMMY_HASH.clone(),
    };
    let password = password.to_string();
    let verified = match hash {
        Some(hash) => tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .unwrap_or(false),
        None => false,
    };

    match user {
        Some(user) if verified => Ok(user),
        _ => Err(IdentityError::InvalidCredentials),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub roles: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Signing keys and token lifetime
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Build keys from config. Returns `true` alongside the keys when the
    /// secret had to be generated.
    pub fn from_config(config: &AuthConfig) -> (Self, bool) {
        let ttl = Duration::hours(config.token_ttl_hours);
        match config.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => (Self::new(secret.as_bytes(), ttl), false),
            None => {
                let secret = format!(
                    "{}{}",
                    uuid::Uuid::new_v4().simple(),
                    uuid::Uuid::new_v4().simple()
                );
                (Self::new(secret.as_bytes(), ttl), true)
            }
        }
    }

    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
        roles: &RoleSet,
    ) -> Result<IssuedToken, IdentityError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let jti = uuid::Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            roles: roles.names(),
            jti: jti.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Verify signature and expiry
    pub fn decode(&self, token: &str) -> Result<Claims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| IdentityError::InvalidToken)
    }
}

/// The authenticated user a request acts as
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: i64,
    pub username: String,
    pub roles: RoleSet,
    /// Token identifier, used by logout
    pub jti: String,
}

/// Turn a bearer token into an [`Actor`].
pub async fn resolve(
    db: &SqlitePool,
    keys: &TokenKeys,
    token: &str,
) -> Result<Actor, IdentityError> {
    let claims = keys.decode(token)?;

    if is_token_revoked(db, &claims.jti).await? {
        return Err(IdentityError::Revoked);
    }

    let user_id: i64 = claims.sub.parse().map_err(|_| IdentityError::InvalidToken)?;
    let user = User::find_by_id(db, user_id)
        .await?
        .ok_or(IdentityError::InvalidToken)?;
    let roles = user.role_set(db).await?;

    Ok(Actor {
        id: user.id,
        username: user.username,
        roles,
        jti: claims.jti,
    })
}

/// Extract the bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{self, blacklist_token, Role};

    fn keys() -> TokenKeys {
        TokenKeys::new(b"test-secret", Duration::hours(1))
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_issue_and_decode() {
        let keys = keys();
        let roles = RoleSet::new(vec![Role::Staff], false);
        let issued = keys.issue(7, "alice", &roles).unwrap();

        let claims = keys.decode(&issued.token).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.roles, vec!["staff".to_string()]);
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_decode_rejects_foreign_signature_and_expired() {
        let issued = keys().issue(1, "bob", &RoleSet::default()).unwrap();
        let other = TokenKeys::new(b"other-secret", Duration::hours(1));
        assert!(matches!(other.decode(&issued.token), Err(IdentityError::InvalidToken)));

        let expired = TokenKeys::new(b"test-secret", Duration::hours(-1))
            .issue(1, "bob", &RoleSet::default())
            .unwrap();
        assert!(matches!(keys().decode(&expired.token), Err(IdentityError::InvalidToken)));
        assert!(matches!(keys().decode("garbage"), Err(IdentityError::InvalidToken)));
    }

    #[test]
    fn test_generated_secret_when_missing() {
        let config = AuthConfig::default();
        let (_, generated) = TokenKeys::from_config(&config);
        assert!(generated);

        let config = AuthConfig {
            jwt_secret: Some("configured".to_string()),
            ..AuthConfig::default()
        };
        let (_, generated) = TokenKeys::from_config(&config);
        assert!(!generated);
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("Authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert("Authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_resolve_checks_revocation_user_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        let keys = keys();

        let user = User::create(&pool, "carol", &hash_password("password1").unwrap(), &[Role::Staff], false)
            .await
            .unwrap();
        let issued = keys.issue(user.id, &user.username, &user.role_set(&pool).await.unwrap()).unwrap();

        let actor = resolve(&pool, &keys, &issued.token).await.unwrap();
        assert_eq!(actor.id, user.id);
        assert!(!actor.roles.can_manage_inventory());

        // Role changes apply to existing tokens
        User::replace_roles(&pool, user.id, &[Role::SuperUser]).await.unwrap();
        let actor = resolve(&pool, &keys, &issued.token).await.unwrap();
        assert!(actor.roles.can_manage_inventory());

        blacklist_token(&pool, &issued.jti).await.unwrap();
        assert!(matches!(
            resolve(&pool, &keys, &issued.token).await,
            Err(IdentityError::Revoked)
        ));

        let other = keys.issue(user.id, &user.username, &RoleSet::default()).unwrap();
        User::delete(&pool, user.id).await.unwrap();
        assert!(matches!(
            resolve(&pool, &keys, &other.token).await,
            Err(IdentityError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path(), &DatabaseConfig::default()).await.unwrap();
        User::create(&pool, "dave", &hash_password("s3cret-pass").unwrap(), &[Role::Staff], false)
            .await
            .unwrap();

        assert!(authenticate(&pool, "dave", "s3cret-pass").await.is_ok());
        assert!(matches!(
            authenticate(&pool, "dave", "nope").await,
            Err(IdentityError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&pool, "nobody", "s3cret-pass").await,
            Err(IdentityError::InvalidCredentials)
        ));
    }
}
