use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        jwt::{TokenPair, TokenService},
        repo::{StoreError, UserStore, UserTx},
        repo_types::{NewUser, User, DEFAULT_LEVEL},
    },
    config::OAuthConfig,
    error::ServiceError,
};

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The provider refused the authorization code.
    #[error("code exchange rejected: {0}")]
    Exchange(String),
    #[error("user info request failed: {0}")]
    Identity(String),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Token returned by the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Profile asserted by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedIdentity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default, alias = "verified_email")]
    pub email_verified: bool,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Consent screen URL the browser is sent to.
    fn auth_url(&self) -> String;

    async fn exchange(&self, code: &str) -> Result<ProviderToken, OAuthError>;

    async fn fetch_identity(&self, token: &ProviderToken) -> Result<FederatedIdentity, OAuthError>;
}

/// Google authorization-code flow.
pub struct GoogleProvider {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
    scopes: Vec<String>,
    state: String,
}

impl GoogleProvider {
    pub fn new(cfg: &OAuthConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(cfg.http_timeout).build()?;
        info!(
            client_id = %cfg.client_id,
            redirect_url = %cfg.redirect_url,
            auth_url = %cfg.auth_url,
            "oauth provider configured"
        );
        Ok(Self {
            http,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_url: cfg.redirect_url.clone(),
            auth_url: cfg.auth_url.clone(),
            token_url: cfg.token_url.clone(),
            userinfo_url: cfg.userinfo_url.clone(),
            scopes: cfg.scopes.clone(),
            state: cfg.state.clone(),
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn auth_url(&self) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &self.state)
            .append_pair("access_type", "offline");
        url.into()
    }

    async fn exchange(&self, code: &str) -> Result<ProviderToken, OAuthError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "oauth token exchange rejected");
            return Err(OAuthError::Exchange(format!("{status}: {body}")));
        }

        let token = response
            .json::<ProviderToken>()
            .await
            .map_err(|e| OAuthError::Exchange(format!("unreadable token response: {e}")))?;
        debug!(expires_in = ?token.expires_in, "oauth code exchanged");
        Ok(token)
    }

    async fn fetch_identity(&self, token: &ProviderToken) -> Result<FederatedIdentity, OAuthError> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "oauth user info request rejected");
            return Err(OAuthError::Identity(format!("status {status}")));
        }

        let identity = response
            .json::<FederatedIdentity>()
            .await
            .map_err(|e| OAuthError::Identity(format!("unreadable user info: {e}")))?;
        if identity.email.trim().is_empty() {
            return Err(OAuthError::Identity("provider returned no email".into()));
        }
        Ok(identity)
    }
}

/// Maps federated identities onto local accounts.
#[derive(Clone)]
pub struct OAuthFederator {
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    provider: Arc<dyn OAuthProvider>,
}

impl OAuthFederator {
    pub fn new(
        store: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        provider: Arc<dyn OAuthProvider>,
    ) -> Self {
        Self {
            store,
            tokens,
            provider,
        }
    }

    pub fn get_auth_url(&self) -> String {
        self.provider.auth_url()
    }

    /// Completes the authorization-code flow and logs the federated user in,
    /// creating the local account on first sight.
    #[instrument(skip(self, code))]
    pub async fn handle_callback(&self, code: &str) -> Result<TokenPair, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::InvalidInput("missing authorization code".into()));
        }

        let token = self.provider.exchange(code).await.map_err(|e| match e {
            OAuthError::Exchange(msg) => ServiceError::ExchangeFailed(msg),
            other => ServiceError::internal("exchange authorization code", other),
        })?;

        let identity = self
            .provider
            .fetch_identity(&token)
            .await
            .map_err(|e| ServiceError::internal("fetch federated identity", e))?;

        let user = self.find_or_create(&identity).await?;

        let pair = self
            .tokens
            .issue_pair(user.id, &user.email, &user.level)
            .map_err(|e| ServiceError::internal("issue tokens", e))?;

        info!(user_id = %user.id, email = %user.email, "oauth login");
        Ok(pair)
    }

    async fn find_or_create(&self, identity: &FederatedIdentity) -> Result<User, ServiceError> {
        match self.try_find_or_create(identity).await {
            Err(StoreError::UniqueViolation) => {
                // A concurrent callback created the account first; use it.
                warn!(email = %identity.email, "oauth account created concurrently, re-reading");
                let mut tx = self.begin().await?;
                let user = tx
                    .get_by_email(&identity.email)
                    .await
                    .map_err(|e| ServiceError::internal("get user by email", e))?
                    .ok_or_else(|| {
                        ServiceError::internal(
                            "resolve oauth account",
                            anyhow::anyhow!("uniqueness conflict but no live row"),
                        )
                    })?;
                tx.commit()
                    .await
                    .map_err(|e| ServiceError::internal("commit transaction", e))?;
                Ok(user)
            }
            Err(e) => {
                error!(error = %e, email = %identity.email, "oauth find-or-create failed");
                Err(ServiceError::internal("find or create oauth account", e))
            }
            Ok(user) => Ok(user),
        }
    }

    async fn try_find_or_create(&self, identity: &FederatedIdentity) -> Result<User, StoreError> {
        let mut tx = self.store.begin().await?;
        let user = match tx.get_by_email(&identity.email).await? {
            Some(existing) => existing,
            None => {
                let created = tx
                    .create(NewUser {
                        email: identity.email.clone(),
                        password_hash: None,
                        level: DEFAULT_LEVEL.to_owned(),
                        full_name: identity.name.clone(),
                        profile_image: identity.picture.clone(),
                        is_verified: identity.email_verified,
                    })
                    .await?;
                info!(user_id = %created.id, email = %created.email, "oauth account created");
                created
            }
        };
        tx.commit().await?;
        Ok(user)
    }

    async fn begin(&self) -> Result<Box<dyn UserTx>, ServiceError> {
        self.store
            .begin()
            .await
            .map_err(|e| ServiceError::internal("begin transaction", e))
    }
}
