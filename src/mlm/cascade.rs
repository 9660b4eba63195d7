use std::collections::HashSet;

use super::payouts::PayoutTable;
use crate::models::users::User;

/// One commission owed to an ancestor of the purchaser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommissionShare {
    pub beneficiary_id: String,
    pub level: u8,
    pub amount_in_cents: i64,
}

/// Walks the purchaser's referrer chain upward and returns the commission owed
/// at each level.
///
/// The walk stops at the first missing referrer, at a referrer id `lookup`
/// cannot resolve, after the last level of the table, or when an id repeats.
/// The purchaser counts as visited, so a chain looping back to them never
/// credits them for their own purchase: on `p -> a -> p` only `a` is paid,
/// where a walk that only tracked ancestors would also pay `p` at level 2.
pub fn cascade<'a, F>(table: &PayoutTable, purchaser: &User, mut lookup: F) -> Vec<CommissionShare>
where
    F: FnMut(&str) -> Option<&'a User>,
{
    let max_level = table.max_level() as usize;
    let mut shares = Vec::with_capacity(max_level);
    let mut visited: HashSet<String> = HashSet::from([purchaser.id.clone()]);
    let mut next = purchaser.referred_by.clone();
    let mut level = 1usize;

    while let Some(referrer_id) = next {
        if level > max_level {
            break;
        }

        if !visited.insert(referrer_id.clone()) {
            log::warn!(
                "Referral cycle at user {} while crediting purchase by {}.",
                referrer_id,
                purchaser.id
            );
            break;
        }

        let Some(referrer) = lookup(&referrer_id) else {
            log::warn!(
                "Unknown referrer {} in chain of {}, stopping at level {}.",
                referrer_id,
                purchaser.id,
                level
            );
            break;
        };

        let amount = table.payout(level as u8);
        if amount > 0 {
            shares.push(CommissionShare {
                beneficiary_id: referrer.id.clone(),
                level: level as u8,
                amount_in_cents: amount,
            });
        }

        next = referrer.referred_by.clone();
        level += 1;
    }

    shares
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;

    fn user(id: &str, referred_by: Option<&str>) -> User {
        User {
            id: id.to_string(),
            name: format!("User {}", id),
            email: format!("{}@example.com", id),
            referral_code: id.to_uppercase(),
            referred_by: referred_by.map(str::to_string),
            level: 1,
            is_admin: false,
            registered_at: Utc::now(),
        }
    }

    /// u0 <- u1 <- ... <- u{len}, returning the index and the purchaser u{len}.
    fn chain(len: usize) -> (HashMap<String, User>, User) {
        let mut users = HashMap::new();
        users.insert("u0".to_string(), user("u0", None));
        for i in 1..=len {
            let parent = format!("u{}", i - 1);
            let id = format!("u{}", i);
            users.insert(id.clone(), user(&id, Some(&parent)));
        }
        let purchaser = users[&format!("u{}", len)].clone();
        (users, purchaser)
    }

    #[test]
    fn three_deep_chain_pays_first_three_levels() {
        let (users, purchaser) = chain(3);
        let shares = cascade(&PayoutTable::standard(), &purchaser, |id| users.get(id));

        let amounts: Vec<(u8, i64)> = shares.iter().map(|s| (s.level, s.amount_in_cents)).collect();
        assert_eq!(amounts, vec![(1, 1000), (2, 600), (3, 400)]);
        assert_eq!(shares[0].beneficiary_id, "u2");
        assert_eq!(shares[2].beneficiary_id, "u0");
        assert_eq!(shares.iter().map(|s| s.amount_in_cents).sum::<i64>(), 2000);
    }

    #[test]
    fn chain_length_up_to_table_size_pays_every_level() {
        let table = PayoutTable::standard();
        for depth in 0..=10 {
            let (users, purchaser) = chain(depth);
            let shares = cascade(&table, &purchaser, |id| users.get(id));
            assert_eq!(shares.len(), depth);
            for (idx, share) in shares.iter().enumerate() {
                assert_eq!(share.level as usize, idx + 1);
                assert_eq!(share.amount_in_cents, table.levels()[idx]);
            }
        }
    }

    #[test]
    fn long_chain_stops_after_ten_levels() {
        let (users, purchaser) = chain(25);
        let shares = cascade(&PayoutTable::standard(), &purchaser, |id| users.get(id));

        assert_eq!(shares.len(), 10);
        assert_eq!(shares.last().map(|s| s.beneficiary_id.as_str()), Some("u15"));
        assert_eq!(shares.iter().map(|s| s.amount_in_cents).sum::<i64>(), 5000);
    }

    #[test]
    fn purchaser_without_referrer_earns_nobody_anything() {
        let purchaser = user("solo", None);
        let shares = cascade(&PayoutTable::standard(), &purchaser, |_| None);
        assert!(shares.is_empty());
    }

    #[test]
    fn cycle_terminates_without_repeating_beneficiaries() {
        let mut users = HashMap::new();
        users.insert("a".to_string(), user("a", Some("c")));
        users.insert("b".to_string(), user("b", Some("a")));
        users.insert("c".to_string(), user("c", Some("b")));
        let purchaser = user("p", Some("c"));

        let shares = cascade(&PayoutTable::standard(), &purchaser, |id| users.get(id));
        let ids: Vec<&str> = shares.iter().map(|s| s.beneficiary_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn cycle_through_purchaser_does_not_credit_purchaser() {
        let mut users = HashMap::new();
        users.insert("a".to_string(), user("a", Some("p")));
        let purchaser = user("p", Some("a"));
        users.insert("p".to_string(), purchaser.clone());

        let shares = cascade(&PayoutTable::standard(), &purchaser, |id| users.get(id));
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].beneficiary_id, "a");
    }

    #[test]
    fn self_referral_earns_nothing() {
        let purchaser = user("p", Some("p"));
        let shares = cascade(&PayoutTable::standard(), &purchaser, |_| Some(&purchaser));
        assert!(shares.is_empty());
    }

    #[test]
    fn unknown_referrer_stops_the_walk() {
        let mut users = HashMap::new();
        users.insert("a".to_string(), user("a", Some("ghost")));
        let purchaser = user("p", Some("a"));

        let shares = cascade(&PayoutTable::standard(), &purchaser, |id| users.get(id));
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].beneficiary_id, "a");
    }

    #[test]
    fn zero_payout_levels_are_skipped_but_counted() {
        let table = PayoutTable::new(vec![0, 500, 0], 500, 1000).unwrap();
        let (users, purchaser) = chain(5);
        let shares = cascade(&table, &purchaser, |id| users.get(id));

        assert_eq!(
            shares,
            vec![CommissionShare {
                beneficiary_id: "u3".to_string(),
                level: 2,
                amount_in_cents: 500,
            }]
        );
    }
}
