use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres};

use super::{commission_description, new_id, Store, StoreError};
use crate::mlm::{self, PayoutTable};
use crate::models::{
    commissions::{Commission, CommissionStatus, PurchaseReceipt},
    referrals::{ProgramTotals, ReferralCounts},
    transactions::{NewPurchase, Transaction, TransactionKind},
    users::{NewUserRecord, User},
};

const USER_COLUMNS: &str =
    "id, name, email, referral_code, referred_by, level, is_admin, registered_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, amount_in_cents, kind, description, created_at, reference_id";
const COMMISSION_COLUMNS: &str =
    "id, user_id, referral_user_id, purchase_id, amount_in_cents, level, status, created_at, paid_at";

#[derive(Clone)]
pub struct PgStore {
    conn: PgPool,
}

impl PgStore {
    pub fn new(conn: PgPool) -> Self {
        PgStore { conn }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.conn).await?;

        Ok(())
    }

    async fn insert_transaction<'c, E>(
        executor: E,
        transaction: &Transaction,
    ) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        sqlx::query(
            r#"INSERT INTO transactions
            (id, user_id, amount_in_cents, kind, description, created_at, reference_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&transaction.id)
        .bind(&transaction.user_id)
        .bind(transaction.amount_in_cents)
        .bind(transaction.kind)
        .bind(&transaction.description)
        .bind(transaction.created_at)
        .bind(&transaction.reference_id)
        .execute(executor)
        .await?;

        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or_default();
            if constraint.contains("referral_code") {
                return StoreError::Conflict("referral_code");
            }
            if constraint.contains("email") {
                return StoreError::Conflict("email");
            }
        }
    }

    StoreError::Database(err)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUserRecord) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users
            (id, name, email, referral_code, referred_by, level, is_admin, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}"#
        ))
        .bind(new_id())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.referral_code)
        .bind(&user.referred_by)
        .bind(user.level)
        .bind(user.is_admin)
        .bind(Utc::now())
        .fetch_one(&self.conn)
        .await
        .map_err(map_unique_violation)?;

        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE referral_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY seq"
        ))
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users
            WHERE POSITION(LOWER($1) IN LOWER(name)) > 0
               OR POSITION(LOWER($1) IN LOWER(email)) > 0
               OR POSITION(LOWER($1) IN LOWER(referral_code)) > 0
            ORDER BY seq"#
        ))
        .bind(query)
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    async fn set_admin(&self, id: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_admin = true WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("User {}", id)))
    }

    async fn referral_counts(&self, user_id: &str) -> Result<ReferralCounts, StoreError> {
        let (direct, indirect): (i64, i64) = sqlx::query_as(
            r#"SELECT
                (SELECT COUNT(1) FROM users WHERE referred_by = $1),
                (SELECT COUNT(1) FROM users u
                    JOIN users d ON u.referred_by = d.id
                    WHERE d.referred_by = $1)"#,
        )
        .bind(user_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(ReferralCounts { direct, indirect })
    }

    async fn record_purchase(
        &self,
        purchase: NewPurchase,
        table: &PayoutTable,
    ) -> Result<PurchaseReceipt, StoreError> {
        let mut tx = self.conn.begin().await?;

        let purchaser = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(&purchase.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("User {}", purchase.user_id)))?;

        // The depth bound keeps the recursion finite even on a corrupt,
        // cyclic chain; the cascade itself stops on the repeat.
        let ancestors = sqlx::query_as::<_, User>(&format!(
            r#"WITH RECURSIVE chain (id, referred_by, depth) AS (
                SELECT u.id, u.referred_by, 1
                FROM users u
                WHERE u.id = (SELECT referred_by FROM users WHERE id = $1)
                UNION ALL
                SELECT u.id, u.referred_by, c.depth + 1
                FROM users u
                JOIN chain c ON u.id = c.referred_by
                WHERE c.depth < $2
            )
            SELECT {USER_COLUMNS} FROM users WHERE id IN (SELECT id FROM chain)"#
        ))
        .bind(&purchaser.id)
        .bind(table.max_level() as i32)
        .fetch_all(&mut *tx)
        .await?;

        let by_id: HashMap<&str, &User> = ancestors.iter().map(|u| (u.id.as_str(), u)).collect();
        let shares = mlm::cascade(table, &purchaser, |id| by_id.get(id).copied());

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
        Self::insert_transaction(&mut *tx, &purchase).await?;

        let mut commissions = Vec::with_capacity(shares.len());
        let mut commission_transactions = Vec::with_capacity(shares.len());
        for share in shares {
            let commission = sqlx::query_as::<_, Commission>(&format!(
                r#"INSERT INTO commissions
                (id, user_id, referral_user_id, purchase_id, amount_in_cents, level, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {COMMISSION_COLUMNS}"#
            ))
            .bind(new_id())
            .bind(&share.beneficiary_id)
            .bind(&purchaser.id)
            .bind(&purchase.id)
            .bind(share.amount_in_cents)
            .bind(share.level as i16)
            .bind(CommissionStatus::Pending)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let transaction = Transaction {
                id: new_id(),
                user_id: share.beneficiary_id,
                amount_in_cents: share.amount_in_cents,
                kind: TransactionKind::Commission,
                description: commission_description(share.level, &purchaser.name),
                created_at: now,
                reference_id: Some(purchase.id.clone()),
            };
            Self::insert_transaction(&mut *tx, &transaction).await?;

            commissions.push(commission);
            commission_transactions.push(transaction);
        }

        tx.commit().await?;

        Ok(PurchaseReceipt {
            purchase,
            commissions,
            commission_transactions,
        })
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, StoreError> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC, seq DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(transactions)
    }

    async fn list_commissions(&self, user_id: Option<&str>) -> Result<Vec<Commission>, StoreError> {
        let commissions = sqlx::query_as::<_, Commission>(&format!(
            r#"SELECT {COMMISSION_COLUMNS} FROM commissions
            WHERE $1::TEXT IS NULL OR user_id = $1
            ORDER BY created_at DESC, seq DESC"#
        ))
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(commissions)
    }

    async fn mark_commission_paid(&self, id: &str) -> Result<Commission, StoreError> {
        let mut tx = self.conn.begin().await?;

        let status: Option<CommissionStatus> =
            sqlx::query_scalar("SELECT status FROM commissions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        match status {
            None => return Err(StoreError::NotFound(format!("Commission {}", id))),
            Some(CommissionStatus::Paid) => {
                return Err(StoreError::InvalidState(format!(
                    "Commission {} is already paid",
                    id
                )))
            }
            Some(CommissionStatus::Pending) => (),
        }

        let commission = sqlx::query_as::<_, Commission>(&format!(
            "UPDATE commissions SET status = $1, paid_at = $2 WHERE id = $3 RETURNING {COMMISSION_COLUMNS}"
        ))
        .bind(CommissionStatus::Paid)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(commission)
    }

    async fn totals(&self) -> Result<ProgramTotals, StoreError> {
        let (total_users, total_purchases, total_commissions_in_cents): (i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT
                    (SELECT COUNT(1) FROM users),
                    (SELECT COUNT(1) FROM transactions WHERE kind = 'purchase'),
                    (SELECT COALESCE(SUM(amount_in_cents), 0)::BIGINT FROM transactions WHERE kind = 'commission')"#,
            )
            .fetch_one(&self.conn)
            .await?;

        Ok(ProgramTotals {
            total_users,
            total_purchases,
            total_commissions_in_cents,
        })
    }
}
