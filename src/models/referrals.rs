use serde::{Deserialize, Serialize};

use super::{transactions::Transaction, users::User};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReferralLink {
    pub user_id: String,
    pub referral_code: String,
    pub link: String,
}

/// A user and the users they referred. Chains can be arbitrarily deep, so
/// the node is never serialized or cloned as a whole; see `ReferralEntry`.
pub struct ReferralNode {
    pub user: User,
    pub children: Vec<ReferralNode>,
}

/// One row of a flattened branch, in pre-order. `depth` is relative to the
/// branch root; `parent_id` is `None` for roots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferralEntry {
    pub user: User,
    pub parent_id: Option<String>,
    pub depth: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReferralCounts {
    pub direct: i64,
    /// Users referred by a direct referral (second level only).
    pub indirect: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserStats {
    pub total_earnings_in_cents: i64,
    pub direct_referrals: i64,
    pub indirect_referrals: i64,
    pub pending_commissions_in_cents: i64,
    pub last_transactions: Vec<Transaction>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProgramTotals {
    pub total_users: i64,
    pub total_purchases: i64,
    pub total_commissions_in_cents: i64,
}
