use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{commission_description, new_id, Store, StoreError};
use crate::mlm::{self, PayoutTable};
use crate::models::{
    commissions::{Commission, CommissionStatus, PurchaseReceipt},
    referrals::{ProgramTotals, ReferralCounts},
    transactions::{NewPurchase, Transaction, TransactionKind},
    users::{NewUserRecord, User},
};

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    by_id: HashMap<String, usize>,
    transactions: Vec<Transaction>,
    commissions: Vec<Commission>,
}

impl MemoryState {
    fn user(&self, id: &str) -> Option<&User> {
        self.by_id.get(id).map(|&idx| &self.users[idx])
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(mut items: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    // Items are kept in insertion order, so reversing first keeps later
    // inserts ahead of earlier ones sharing a timestamp.
    items.reverse();
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUserRecord) -> Result<User, StoreError> {
        let mut state = self.state.write().await;

        let email = user.email.to_lowercase();
        if state.users.iter().any(|u| u.email.to_lowercase() == email) {
            return Err(StoreError::Conflict("email"));
        }
        if state
            .users
            .iter()
            .any(|u| u.referral_code == user.referral_code)
        {
            return Err(StoreError::Conflict("referral_code"));
        }

        let user = User {
            id: new_id(),
            name: user.name,
            email: user.email,
            referral_code: user.referral_code,
            referred_by: user.referred_by,
            level: user.level,
            is_admin: user.is_admin,
            registered_at: Utc::now(),
        };

        let idx = state.users.len();
        state.by_id.insert(user.id.clone(), idx);
        state.users.push(user.clone());

        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.user(id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_lowercase();
        let state = self.state.read().await;

        Ok(state
            .users
            .iter()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;

        Ok(state.users.iter().find(|u| u.referral_code == code).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.state.read().await.users.clone())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>, StoreError> {
        let query = query.to_lowercase();
        let state = self.state.read().await;

        Ok(state
            .users
            .iter()
            .filter(|u| {
                u.name.to_lowercase().contains(&query)
                    || u.email.to_lowercase().contains(&query)
                    || u.referral_code.to_lowercase().contains(&query)
            })
            .cloned()
            .collect())
    }

    async fn set_admin(&self, id: &str) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        let idx = *state
            .by_id
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("User {}", id)))?;

        state.users[idx].is_admin = true;
        Ok(state.users[idx].clone())
    }

    async fn referral_counts(&self, user_id: &str) -> Result<ReferralCounts, StoreError> {
        let state = self.state.read().await;

        Ok(mlm::stats::count_referrals(&state.users, user_id))
    }

    async fn record_purchase(
        &self,
        purchase: NewPurchase,
        table: &PayoutTable,
    ) -> Result<PurchaseReceipt, StoreError> {
        // Held for the whole purchase so the cascade sees a consistent chain
        // and the writes land together.
        let mut state = self.state.write().await;

        let purchaser = state
            .user(&purchase.user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("User {}", purchase.user_id)))?;
        let shares = mlm::cascade(table, &purchaser, |id| state.user(id));

        let now = Utc::now();
        let purchase = Transaction {
            id: new_id(),
            user_id: purchaser.id.clone(),
            amount_in_cents: purchase.amount_in_cents,
            kind: TransactionKind::Purchase,
            description: purchase.description,
            created_at: now,
            reference_id: None,
        };

        let mut commissions = Vec::with_capacity(shares.len());
        let mut commission_transactions = Vec::with_capacity(shares.len());
        for share in shares {
            commissions.push(Commission {
                id: new_id(),
                user_id: share.beneficiary_id.clone(),
                referral_user_id: purchaser.id.clone(),
                purchase_id: purchase.id.clone(),
                amount_in_cents: share.amount_in_cents,
                level: share.level as i16,
                status: CommissionStatus::Pending,
                created_at: now,
                paid_at: None,
            });
            commission_transactions.push(Transaction {
                id: new_id(),
                user_id: share.beneficiary_id,
                amount_in_cents: share.amount_in_cents,
                kind: TransactionKind::Commission,
                description: commission_description(share.level, &purchaser.name),
                created_at: now,
                reference_id: Some(purchase.id.clone()),
            });
        }

        state.transactions.push(purchase.clone());
        state
            .transactions
            .extend(commission_transactions.iter().cloned());
        state.commissions.extend(commissions.iter().cloned());

        Ok(PurchaseReceipt {
            purchase,
            commissions,
            commission_transactions,
        })
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        let transactions = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();

        Ok(newest_first(transactions, |t: &Transaction| t.created_at))
    }

    async fn list_commissions(&self, user_id: Option<&str>) -> Result<Vec<Commission>, StoreError> {
        let state = self.state.read().await;
        let commissions = state
            .commissions
            .iter()
            .filter(|c| user_id.map_or(true, |id| c.user_id == id))
            .cloned()
            .collect();

        Ok(newest_first(commissions, |c: &Commission| c.created_at))
    }

    async fn mark_commission_paid(&self, id: &str) -> Result<Commission, StoreError> {
        let mut state = self.state.write().await;
        let commission = state
            .commissions
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Commission {}", id)))?;

        if commission.status == CommissionStatus::Paid {
            return Err(StoreError::InvalidState(format!(
                "Commission {} is already paid",
                id
            )));
        }

        commission.status = CommissionStatus::Paid;
        commission.paid_at = Some(Utc::now());
        Ok(commission.clone())
    }

    async fn totals(&self) -> Result<ProgramTotals, StoreError> {
        let state = self.state.read().await;
        let count = |kind: TransactionKind| {
            state
                .transactions
                .iter()
                .filter(|t| t.kind == kind)
                .collect::<Vec<_>>()
        };

        Ok(ProgramTotals {
            total_users: state.users.len() as i64,
            total_purchases: count(TransactionKind::Purchase).len() as i64,
            total_commissions_in_cents: count(TransactionKind::Commission)
                .iter()
                .map(|t| t.amount_in_cents)
                .sum(),
        })
    }
}
