use async_trait::async_trait;

use crate::mlm::PayoutTable;
use crate::models::{
    commissions::{Commission, PurchaseReceipt},
    referrals::{ProgramTotals, ReferralCounts},
    transactions::{NewPurchase, Transaction},
    users::{NewUserRecord, User},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Duplicate {0}")]
    Conflict(&'static str),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Persistence for users, the transaction ledger and commissions.
///
/// `record_purchase` is atomic: the purchase and every commission it
/// produces are written together or not at all.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fails with `Conflict("email")` or `Conflict("referral_code")`.
    async fn insert_user(&self, user: NewUserRecord) -> Result<User, StoreError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Case-insensitive.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError>;

    /// All users in registration order.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Case-insensitive substring match on name, email or referral code.
    async fn search_users(&self, query: &str) -> Result<Vec<User>, StoreError>;

    async fn set_admin(&self, id: &str) -> Result<User, StoreError>;

    async fn referral_counts(&self, user_id: &str) -> Result<ReferralCounts, StoreError>;

    async fn record_purchase(
        &self,
        purchase: NewPurchase,
        table: &PayoutTable,
    ) -> Result<PurchaseReceipt, StoreError>;

    /// Newest first.
    async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, StoreError>;

    /// Commissions earned by `user_id`, or all commissions. Newest first.
    async fn list_commissions(&self, user_id: Option<&str>) -> Result<Vec<Commission>, StoreError>;

    async fn mark_commission_paid(&self, id: &str) -> Result<Commission, StoreError>;

    async fn totals(&self) -> Result<ProgramTotals, StoreError>;
}

pub(crate) fn commission_description(level: u8, purchaser_name: &str) -> String {
    format!("Level {} commission from {}", level, purchaser_name)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().hyphenated().to_string()
}
