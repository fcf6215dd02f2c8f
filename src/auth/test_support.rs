//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    oauth::{FederatedIdentity, OAuthError, OAuthProvider, ProviderToken},
    repo::{StoreError, UserStore, UserTx},
    repo_types::{NewUser, User},
};

#[derive(Default)]
struct Shared {
    rows: Mutex<Vec<User>>,
    fail_commits: AtomicBool,
    race_email: Mutex<Option<String>>,
}

/// `UserStore` backed by a vector. Writes are staged per transaction and only
/// become visible on commit; commit re-checks email uniqueness the way a
/// unique index would.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    shared: Arc<Shared>,
}

impl MemoryUserStore {
    /// All rows, including soft-deleted ones.
    pub fn users(&self) -> Vec<User> {
        self.shared.rows.lock().unwrap().clone()
    }

    pub fn insert(&self, new: NewUser) -> User {
        let user = materialize(new);
        self.shared.rows.lock().unwrap().push(user.clone());
        user
    }

    pub fn soft_delete(&self, id: Uuid) {
        let mut rows = self.shared.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|u| u.id == id) {
            row.deleted_at = Some(OffsetDateTime::now_utc());
        }
    }

    /// Every later commit fails with a database error.
    pub fn fail_commits(&self) {
        self.shared.fail_commits.store(true, Ordering::SeqCst);
    }

    /// The next `create` for `email` loses to a concurrent writer: a row for
    /// it is committed behind the caller's back and the insert is rejected.
    pub fn race_on_create(&self, email: &str) {
        *self.shared.race_email.lock().unwrap() = Some(email.to_owned());
    }
}

fn materialize(new: NewUser) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id: Uuid::new_v4(),
        email: new.email,
        password_hash: new.password_hash,
        level: new.level,
        full_name: new.full_name,
        profile_image: new.profile_image,
        is_verified: new.is_verified,
        last_login_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

fn live_with_email<'a>(rows: &'a [User], email: &str) -> Option<&'a User> {
    rows.iter().find(|u| u.deleted_at.is_none() && u.email == email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError> {
        Ok(Box::new(MemoryUserTx {
            shared: self.shared.clone(),
            created: Vec::new(),
            logins: HashMap::new(),
        }))
    }
}

struct MemoryUserTx {
    shared: Arc<Shared>,
    created: Vec<User>,
    logins: HashMap<Uuid, OffsetDateTime>,
}

impl MemoryUserTx {
    fn overlay(&self, mut user: User) -> User {
        if let Some(at) = self.logins.get(&user.id) {
            user.last_login_at = Some(*at);
            user.updated_at = *at;
        }
        user
    }
}

#[async_trait]
impl UserTx for MemoryUserTx {
    async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let staged = live_with_email(&self.created, email).cloned();
        let found = match staged {
            Some(user) => Some(user),
            None => {
                let rows = self.shared.rows.lock().unwrap();
                let user = live_with_email(&rows, email).cloned();
                user
            }
        };
        // Let concurrent transactions read before this one writes.
        tokio::task::yield_now().await;
        Ok(found.map(|u| self.overlay(u)))
    }

    async fn create(&mut self, new: NewUser) -> Result<User, StoreError> {
        let raced = {
            let mut race = self.shared.race_email.lock().unwrap();
            if race.as_deref() == Some(new.email.as_str()) {
                race.take()
            } else {
                None
            }
        };
        if raced.is_some() {
            let winner = materialize(new);
            self.shared.rows.lock().unwrap().push(winner);
            return Err(StoreError::UniqueViolation);
        }

        let taken = live_with_email(&self.shared.rows.lock().unwrap(), &new.email).is_some();
        if taken || live_with_email(&self.created, &new.email).is_some() {
            return Err(StoreError::UniqueViolation);
        }
        let user = materialize(new);
        self.created.push(user.clone());
        Ok(user)
    }

    async fn update_last_login(&mut self, user_id: Uuid) -> Result<User, StoreError> {
        let base = self
            .created
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .or_else(|| {
                self.shared
                    .rows
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|u| u.id == user_id && u.deleted_at.is_none())
                    .cloned()
            })
            .ok_or(StoreError::NotFound)?;
        self.logins.insert(user_id, OffsetDateTime::now_utc());
        Ok(self.overlay(base))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.shared.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut rows = self.shared.rows.lock().unwrap();
        if self
            .created
            .iter()
            .any(|u| live_with_email(&rows, &u.email).is_some())
        {
            return Err(StoreError::UniqueViolation);
        }
        rows.extend(self.created.iter().cloned());
        for row in rows.iter_mut() {
            if let Some(at) = self.logins.get(&row.id) {
                row.last_login_at = Some(*at);
                row.updated_at = *at;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Provider that accepts any code and asserts a fixed identity.
pub struct StubProvider {
    identity: FederatedIdentity,
    reject_codes: bool,
}

impl StubProvider {
    pub fn new(email: &str) -> Self {
        Self {
            identity: FederatedIdentity {
                email: email.to_owned(),
                name: Some("Fed User".into()),
                picture: Some("https://example.com/fed.png".into()),
                email_verified: true,
            },
            reject_codes: false,
        }
    }

    pub fn rejecting_codes(mut self) -> Self {
        self.reject_codes = true;
        self
    }
}

#[async_trait]
impl OAuthProvider for StubProvider {
    fn auth_url(&self) -> String {
        "https://accounts.example.com/o/oauth2/auth?client_id=client-id&state=state".into()
    }

    async fn exchange(&self, code: &str) -> Result<ProviderToken, OAuthError> {
        if self.reject_codes {
            return Err(OAuthError::Exchange(format!("invalid_grant for {code}")));
        }
        Ok(ProviderToken {
            access_token: format!("provider-token-{code}"),
            expires_in: Some(3600),
        })
    }

    async fn fetch_identity(&self, _token: &ProviderToken) -> Result<FederatedIdentity, OAuthError> {
        Ok(self.identity.clone())
    }
}
