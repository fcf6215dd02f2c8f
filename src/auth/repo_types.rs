use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Level assigned to every newly created account.
pub const DEFAULT_LEVEL: &str = "1";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // Argon2 PHC string; absent for OAuth-only accounts
    pub level: String,
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
    pub is_verified: bool,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Column values for an insert; id and timestamps are generated by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub level: String,
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
    pub is_verified: bool,
}
