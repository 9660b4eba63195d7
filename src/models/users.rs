use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub level: i32,
    pub is_admin: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub referral_code: Option<String>,
}

/// Row handed to a store once the service has resolved the referrer and
/// picked a referral code.
#[derive(Clone, Debug)]
pub struct NewUserRecord {
    pub name: String,
    pub email: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub level: i32,
    pub is_admin: bool,
}
