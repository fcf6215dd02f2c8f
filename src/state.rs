use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::postgres::PgPoolOptions;

use crate::{
    auth::{
        jwt::TokenService,
        oauth::{GoogleProvider, OAuthFederator, OAuthProvider},
        password::PasswordHasher,
        repo::{PgUserStore, UserStore},
        services::IdentityService,
    },
    config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub identity: Arc<IdentityService>,
    pub oauth: Arc<OAuthFederator>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        // Run migrations if present
        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
        }

        let store = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        let provider = Arc::new(GoogleProvider::new(&config.google)?) as Arc<dyn OAuthProvider>;
        Self::from_parts(config, store, provider)
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        provider: Arc<dyn OAuthProvider>,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenService::new(&config.jwt));
        let hasher = PasswordHasher::new(&config.password)?;
        let identity = Arc::new(IdentityService::new(store.clone(), hasher, tokens.clone()));
        let oauth = Arc::new(OAuthFederator::new(store, tokens.clone(), provider));

        Ok(Self {
            config: Arc::new(config),
            tokens,
            identity,
            oauth,
        })
    }
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}
