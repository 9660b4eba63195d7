use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "transaction_kind", rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Commission,
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount_in_cents: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// For commissions, the purchase transaction that produced them.
    pub reference_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPurchase {
    pub user_id: String,
    pub amount_in_cents: i64,
    pub description: String,
}
