use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::auth::dto::TokenPair;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::users::dto::PublicUser;
use crate::users::repo::{StoreError, User, UserStore};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email already registered")]
    EmailTaken,
    #[error("nickname already taken")]
    NicknameTaken,
    // Shared by the unknown-email and wrong-password paths so callers cannot
    // tell which one happened.
    #[error("email or password does not match")]
    InvalidCredentials,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AuthError::EmailTaken,
            StoreError::DuplicateNickname => AuthError::NicknameTaken,
            other => AuthError::Store(other),
        }
    }
}

/// Orchestrates registration, login and the refresh-token lifecycle against
/// an injected user store and signing keys. The sole writer of refresh-token
/// hashes.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, keys: JwtKeys) -> Self {
        Self { users, keys }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn register(
        &self,
        email: &str,
        nickname: &str,
        password: &str,
    ) -> Result<PublicUser, AuthError> {
        if self.users.find_by_email(email).await?.is_some() {
            warn!(email = %email, "registration with taken email");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password(password)?;

        // Concurrent registrations can both pass the lookup above; the store
        // maps the unique-constraint violation back to the same conflict.
        let user = self.users.create(email, nickname, &password_hash).await?;

        info!(user_id = user.id, email = %user.email, "user registered");
        Ok(PublicUser::from(&user))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let user = match self.users.find_by_email(email).await? {
            Some(u) => u,
            None => {
                warn!(email = %email, "login with unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = user.id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self.create_tokens(&user).await?;
        info!(user_id = user.id, "user logged in");
        Ok(pair)
    }

    /// Signs a fresh access/refresh pair and overwrites the stored
    /// refresh-token hash, invalidating any earlier refresh token. Only the
    /// hash is persisted; the raw refresh token goes to the caller.
    pub async fn create_tokens(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access_token = self.keys.sign_access(user)?;
        let refresh_token = self.keys.sign_refresh(user)?;

        let refresh_hash = hash_password(&refresh_token)?;
        self.users
            .update_refresh_token_hash(user.id, &refresh_hash)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Checks a raw refresh token against the stored hash. `None` means the
    /// user is unknown, never logged in, or presented a token other than the
    /// most recently issued one.
    pub async fn validate_refresh_token(
        &self,
        user_id: i64,
        raw: &str,
    ) -> Result<Option<User>, AuthError> {
        let user = match self.users.find_by_id(user_id).await? {
            Some(u) => u,
            None => return Ok(None),
        };
        let hash = match user.refresh_token_hash.as_deref() {
            Some(h) => h,
            None => return Ok(None),
        };
        if verify_password(raw, hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Refresh with rotation: the presented token must carry a valid refresh
    /// signature and match the stored hash, and is replaced by the new
    /// pair's hash, so it cannot be replayed.
    pub async fn refresh(&self, raw: &str) -> Result<TokenPair, AuthError> {
        let claims = match self.keys.verify_refresh(raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "refresh token failed signature check");
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        let user = self
            .validate_refresh_token(claims.sub, raw)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        let pair = self.create_tokens(&user).await?;
        info!(user_id = user.id, "refresh token rotated");
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;
    use crate::config::JwtConfig;

    /// In-memory stand-in for the Postgres store, enforcing the same
    /// uniqueness rules.
    struct MemoryUserStore {
        users: Mutex<Vec<User>>,
    }

    impl MemoryUserStore {
        fn new() -> Self {
            Self {
                users: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.users.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.id == id)
                .cloned())
        }

        async fn create(
            &self,
            email: &str,
            nickname: &str,
            password_hash: &str,
        ) -> Result<User, StoreError> {
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.email == email) {
                return Err(StoreError::DuplicateEmail);
            }
            if users.iter().any(|u| u.nickname == nickname) {
                return Err(StoreError::DuplicateNickname);
            }
            let user = User {
                id: users.len() as i64 + 1,
                email: email.to_string(),
                nickname: nickname.to_string(),
                password_hash: password_hash.to_string(),
                refresh_token_hash: None,
                created_at: OffsetDateTime::now_utc(),
            };
            users.push(user.clone());
            Ok(user)
        }

        async fn update_refresh_token_hash(&self, id: i64, hash: &str) -> Result<(), StoreError> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.iter_mut().find(|u| u.id == id) {
                user.refresh_token_hash = Some(hash.to_string());
            }
            Ok(())
        }
    }

    fn service() -> (AuthService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let keys = JwtKeys::from_config(&JwtConfig {
            access_secret: "access-test-secret".into(),
            refresh_secret: "refresh-test-secret".into(),
            access_ttl_minutes: 60,
            refresh_ttl_minutes: 60 * 24 * 7,
        });
        (AuthService::new(store.clone(), keys), store)
    }

    #[tokio::test]
    async fn register_returns_sanitized_view() {
        let (auth, _) = service();
        let view = auth.register("a@x.com", "alice", "pw123456").await.unwrap();

        let json = serde_json::to_value(&view).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj["email"], "a@x.com");
        assert_eq!(obj["nickname"], "alice");
        assert!(!obj.contains_key("password"));
        assert!(!obj.contains_key("passwordHash"));
        assert!(!obj.contains_key("refreshTokenHash"));
    }

    #[tokio::test]
    async fn register_duplicate_email_is_conflict() {
        let (auth, store) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();

        let err = auth
            .register("a@x.com", "alice2", "pw654321")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn register_maps_store_level_conflict() {
        // The check/insert race surfaces as a store error; it must map to
        // the same conflict as the lookup path.
        assert!(matches!(
            AuthError::from(StoreError::DuplicateEmail),
            AuthError::EmailTaken
        ));
        assert!(matches!(
            AuthError::from(StoreError::DuplicateNickname),
            AuthError::NicknameTaken
        ));
    }

    #[tokio::test]
    async fn login_returns_verifiable_token_pair() {
        let (auth, _) = service();
        let user = auth.register("a@x.com", "alice", "pw123456").await.unwrap();

        let pair = auth.login("a@x.com", "pw123456").await.unwrap();

        let access = auth.keys().verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, user.id);
        assert_eq!(access.email, "a@x.com");

        let refresh = auth.keys().verify_refresh(&pair.refresh_token).unwrap();
        assert_eq!(refresh.sub, user.id);
        assert_eq!(refresh.email, "a@x.com");

        // Each token verifies only against its own secret.
        assert!(auth.keys().verify_refresh(&pair.access_token).is_err());
        assert!(auth.keys().verify_access(&pair.refresh_token).is_err());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_indistinguishable() {
        let (auth, _) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();

        let wrong_password = auth.login("a@x.com", "wrongpw").await.unwrap_err();
        let unknown_email = auth.login("nobody@x.com", "pw123456").await.unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn validate_refresh_token_matches_only_issued_token() {
        let (auth, _) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();
        let pair = auth.login("a@x.com", "pw123456").await.unwrap();

        let user = auth
            .validate_refresh_token(1, &pair.refresh_token)
            .await
            .unwrap();
        assert_eq!(user.unwrap().email, "a@x.com");

        let miss = auth
            .validate_refresh_token(1, "some-other-string")
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn validate_refresh_token_without_login_is_none() {
        let (auth, _) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();

        let res = auth.validate_refresh_token(1, "anything").await.unwrap();
        assert!(res.is_none());

        let unknown_user = auth.validate_refresh_token(99, "anything").await.unwrap();
        assert!(unknown_user.is_none());
    }

    #[tokio::test]
    async fn second_login_invalidates_first_refresh_token() {
        let (auth, _) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();

        let first = auth.login("a@x.com", "pw123456").await.unwrap();
        let second = auth.login("a@x.com", "pw123456").await.unwrap();

        let stale = auth
            .validate_refresh_token(1, &first.refresh_token)
            .await
            .unwrap();
        assert!(stale.is_none());

        let current = auth
            .validate_refresh_token(1, &second.refresh_token)
            .await
            .unwrap();
        assert!(current.is_some());
    }

    #[tokio::test]
    async fn refresh_rotates_the_stored_token() {
        let (auth, _) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();
        let pair = auth.login("a@x.com", "pw123456").await.unwrap();

        let rotated = auth.refresh(&pair.refresh_token).await.unwrap();
        assert!(auth.keys().verify_access(&rotated.access_token).is_ok());

        // The presented token was consumed by the rotation.
        let replay = auth.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(replay, AuthError::InvalidRefreshToken));

        // The rotated one is now the active session.
        assert!(auth.refresh(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let (auth, _) = service();
        auth.register("a@x.com", "alice", "pw123456").await.unwrap();
        let pair = auth.login("a@x.com", "pw123456").await.unwrap();

        let err = auth.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
    }
}
