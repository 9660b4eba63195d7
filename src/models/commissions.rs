use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transactions::Transaction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "commission_status", rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Paid,
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Commission {
    pub id: String,
    /// Beneficiary of the commission.
    pub user_id: String,
    /// The purchaser whose purchase produced it.
    pub referral_user_id: String,
    pub purchase_id: String,
    pub amount_in_cents: i64,
    pub level: i16,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Everything written by a single purchase.
#[derive(Clone, Debug, Serialize)]
pub struct PurchaseReceipt {
    pub purchase: Transaction,
    pub commissions: Vec<Commission>,
    pub commission_transactions: Vec<Transaction>,
}

impl PurchaseReceipt {
    pub fn total_commissions_in_cents(&self) -> i64 {
        self.commissions.iter().map(|c| c.amount_in_cents).sum()
    }
}
