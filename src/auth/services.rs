use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{ProfileResponse, RegisterResponse},
        jwt::{TokenPair, TokenService},
        password::PasswordHasher,
        repo::{StoreError, UserStore, UserTx},
        repo_types::{NewUser, DEFAULT_LEVEL},
    },
    error::ServiceError,
};

/// Registration, password login and profile lookup.
///
/// Each operation runs inside one store transaction. The handle rolls back on
/// drop, so every early return leaves the store untouched.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    tokens: Arc<TokenService>,
}

impl IdentityService {
    pub fn new(store: Arc<dyn UserStore>, hasher: PasswordHasher, tokens: Arc<TokenService>) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    async fn begin(&self) -> Result<Box<dyn UserTx>, ServiceError> {
        self.store
            .begin()
            .await
            .map_err(|e| ServiceError::internal("begin transaction", e))
    }

    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<RegisterResponse, ServiceError> {
        let mut tx = self.begin().await?;

        // Fast path only; the unique index is what actually guards the email.
        let existing = tx
            .get_by_email(email)
            .await
            .map_err(|e| ServiceError::internal("get user by email", e))?;
        if existing.is_some() {
            warn!(email, "email already registered");
            return Err(ServiceError::AlreadyExists(email.to_owned()));
        }

        let hash = self.hash(password).await?;

        let user = tx
            .create(NewUser {
                email: email.to_owned(),
                password_hash: Some(hash),
                level: DEFAULT_LEVEL.to_owned(),
                full_name: Some(name.to_owned()),
                profile_image: None,
                is_verified: false,
            })
            .await
            .map_err(|e| duplicate_or_internal(email, "create user", e))?;

        tx.commit()
            .await
            .map_err(|e| duplicate_or_internal(email, "commit transaction", e))?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(RegisterResponse {
            id: user.id,
            email: user.email,
        })
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ServiceError> {
        let mut tx = self.begin().await?;

        let user = tx
            .get_by_email(email)
            .await
            .map_err(|e| ServiceError::internal("get user by email", e))?
            .ok_or_else(|| {
                warn!(email, "login unknown email");
                ServiceError::NotFound
            })?;

        let Some(stored_hash) = user.password_hash.clone() else {
            warn!(user_id = %user.id, "login on account without password");
            return Err(ServiceError::Unauthorized);
        };
        if !self.verify(stored_hash, password).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(ServiceError::Unauthorized);
        }

        let user = tx
            .update_last_login(user.id)
            .await
            .map_err(|e| ServiceError::internal("update last login", e))?;
        tx.commit()
            .await
            .map_err(|e| ServiceError::internal("commit transaction", e))?;

        // The login is durable from here on; a signing failure does not undo it.
        let pair = self
            .tokens
            .issue_pair(user.id, &user.email, &user.level)
            .map_err(|e| ServiceError::internal("issue tokens", e))?;

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(pair)
    }

    #[instrument(skip(self))]
    pub async fn profile(&self, email: &str) -> Result<ProfileResponse, ServiceError> {
        let mut tx = self.begin().await?;
        let user = tx
            .get_by_email(email)
            .await
            .map_err(|e| ServiceError::internal("get user by email", e))?
            .ok_or(ServiceError::NotFound)?;
        tx.rollback()
            .await
            .map_err(|e| ServiceError::internal("close read transaction", e))?;

        Ok(ProfileResponse {
            email: user.email,
            name: user.full_name,
            profile_image: user.profile_image,
        })
    }

    async fn hash(&self, password: &str) -> Result<String, ServiceError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::internal("join hashing task", e))?
            .map_err(|e| ServiceError::internal("hash password", e))
    }

    async fn verify(&self, hash: String, password: &str) -> Result<bool, ServiceError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| ServiceError::internal("join verify task", e))?
            .map_err(|e| ServiceError::internal("verify password", e))
    }
}

fn duplicate_or_internal(email: &str, op: &'static str, err: StoreError) -> ServiceError {
    match err {
        StoreError::UniqueViolation => {
            warn!(email, "email registered concurrently");
            ServiceError::AlreadyExists(email.to_owned())
        }
        other => ServiceError::internal(op, other),
    }
}
