use crate::models::{
    commissions::{Commission, CommissionStatus},
    referrals::{ReferralCounts, UserStats},
    transactions::{Transaction, TransactionKind},
    users::User,
};

pub const RECENT_TRANSACTIONS: usize = 5;

/// Direct and second-level referral counts of `user_id` over a full user list.
pub fn count_referrals(users: &[User], user_id: &str) -> ReferralCounts {
    let direct: Vec<&str> = users
        .iter()
        .filter(|u| u.referred_by.as_deref() == Some(user_id))
        .map(|u| u.id.as_str())
        .collect();

    let indirect = users
        .iter()
        .filter(|u| {
            u.referred_by
                .as_deref()
                .is_some_and(|referrer| direct.contains(&referrer))
        })
        .count();

    ReferralCounts {
        direct: direct.len() as i64,
        indirect: indirect as i64,
    }
}

/// `transactions` and `commissions` must belong to the user the stats are for.
pub fn user_stats(
    counts: ReferralCounts,
    transactions: &[Transaction],
    commissions: &[Commission],
) -> UserStats {
    let total_earnings_in_cents = transactions
        .iter()
        .filter(|t| t.kind == TransactionKind::Commission)
        .map(|t| t.amount_in_cents)
        .sum();

    let pending_commissions_in_cents = commissions
        .iter()
        .filter(|c| c.status == CommissionStatus::Pending)
        .map(|c| c.amount_in_cents)
        .sum();

    let mut last_transactions = transactions.to_vec();
    last_transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    last_transactions.truncate(RECENT_TRANSACTIONS);

    UserStats {
        total_earnings_in_cents,
        direct_referrals: counts.direct,
        indirect_referrals: counts.indirect,
        pending_commissions_in_cents,
        last_transactions,
    }
}
