use std::collections::HashMap;

use crate::models::{
    referrals::{ReferralEntry, ReferralNode},
    users::User,
};

/// Builds the referral forest from a flat user list.
///
/// Users without a referrer, or whose referrer is not in the list, become
/// roots. Everyone else is attached under their referrer. Roots and siblings
/// keep the order of `users`. Users sitting on a referral cycle are not
/// reachable from any root and are left out.
pub fn build_forest(users: &[User]) -> Vec<ReferralNode> {
    let index: HashMap<&str, usize> = users
        .iter()
        .enumerate()
        .map(|(idx, user)| (user.id.as_str(), idx))
        .collect();
    let parent_of = |idx: usize| {
        users[idx]
            .referred_by
            .as_deref()
            .and_then(|id| index.get(id).copied())
    };

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); users.len()];
    for idx in 0..users.len() {
        match parent_of(idx) {
            Some(parent) => children[parent].push(idx),
            None => roots.push(idx),
        }
    }

    // Pre-order walk; every node is reached at most once since it has a
    // single parent.
    let mut order = Vec::with_capacity(users.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(idx) = stack.pop() {
        order.push(idx);
        stack.extend(children[idx].iter().rev());
    }

    let mut slots: Vec<Option<ReferralNode>> = users
        .iter()
        .map(|user| {
            Some(ReferralNode {
                user: user.clone(),
                children: Vec::new(),
            })
        })
        .collect();

    // In reverse pre-order a node's whole subtree is complete before the node
    // itself moves into its parent. Siblings arrive last-first.
    for &idx in order.iter().rev() {
        let Some(parent) = parent_of(idx) else {
            continue;
        };
        if let Some(mut node) = slots[idx].take() {
            node.children.reverse();
            if let Some(parent_node) = slots[parent].as_mut() {
                parent_node.children.push(node);
            }
        }
    }

    roots
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .map(|mut node| {
            node.children.reverse();
            node
        })
        .collect()
}

/// Moves the subtree rooted at `user_id` out of the forest.
pub fn take_node(forest: Vec<ReferralNode>, user_id: &str) -> Option<ReferralNode> {
    let mut stack = forest;

    while let Some(mut node) = stack.pop() {
        if node.user.id == user_id {
            return Some(node);
        }
        stack.append(&mut node.children);
    }

    None
}

/// Pre-order listing of a forest, roots at depth 0.
pub fn flatten(forest: &[ReferralNode]) -> Vec<ReferralEntry> {
    let mut entries = Vec::new();
    let mut stack: Vec<(&ReferralNode, Option<&str>, u32)> =
        forest.iter().rev().map(|node| (node, None, 0)).collect();

    while let Some((node, parent_id, depth)) = stack.pop() {
        entries.push(ReferralEntry {
            user: node.user.clone(),
            parent_id: parent_id.map(str::to_string),
            depth,
        });
        stack.extend(
            node.children
                .iter()
                .rev()
                .map(|child| (child, Some(node.user.id.as_str()), depth + 1)),
        );
    }

    entries
}

/// The branch below `user_id`, the user first at depth 0. A user on a
/// referral cycle has no place in the forest and gets a branch of their own.
/// `None` if the user is not in the list.
pub fn branch(users: &[User], user_id: &str) -> Option<Vec<ReferralEntry>> {
    let user = users.iter().find(|u| u.id == user_id)?;

    match take_node(build_forest(users), user_id) {
        Some(node) => Some(flatten(std::slice::from_ref(&node))),
        None => {
            log::warn!("User {} sits on a referral cycle.", user_id);
            Some(vec![ReferralEntry {
                user: user.clone(),
                parent_id: None,
                depth: 0,
            }])
        }
    }
}

impl ReferralNode {
    /// Number of users in this subtree, the root included.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

// Unlinks children onto a heap stack so that dropping a deep chain does not
// recurse once per level.
impl Drop for ReferralNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;

    use super::*;

    fn user(id: &str, referred_by: Option<&str>) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.com", id),
            referral_code: id.to_uppercase(),
            referred_by: referred_by.map(str::to_string),
            level: 1,
            is_admin: false,
            registered_at: Utc::now(),
        }
    }

    fn ids(nodes: &[ReferralNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.user.id.as_str()).collect()
    }

    fn entry_ids(entries: &[ReferralEntry]) -> Vec<(&str, Option<&str>, u32)> {
        entries
            .iter()
            .map(|e| (e.user.id.as_str(), e.parent_id.as_deref(), e.depth))
            .collect()
    }

    fn sample_users() -> Vec<User> {
        vec![
            user("admin", None),
            user("alice", None),
            user("bob", Some("alice")),
            user("carol", Some("bob")),
            user("dave", Some("alice")),
            user("eve", Some("dave")),
            user("frank", Some("alice")),
        ]
    }

    #[test]
    fn roots_are_users_without_referrer() {
        let forest = build_forest(&sample_users());
        assert_eq!(ids(&forest), vec!["admin", "alice"]);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn children_keep_input_order() {
        let forest = build_forest(&sample_users());
        let alice = &forest[1];
        assert_eq!(ids(&alice.children), vec!["bob", "dave", "frank"]);
        assert_eq!(ids(&alice.children[0].children), vec!["carol"]);
        assert_eq!(ids(&alice.children[1].children), vec!["eve"]);
    }

    #[test]
    fn flatten_lists_forest_in_pre_order() {
        let forest = build_forest(&sample_users());
        assert_eq!(
            entry_ids(&flatten(&forest)),
            vec![
                ("admin", None, 0),
                ("alice", None, 0),
                ("bob", Some("alice"), 1),
                ("carol", Some("bob"), 2),
                ("dave", Some("alice"), 1),
                ("eve", Some("dave"), 2),
                ("frank", Some("alice"), 1),
            ]
        );
    }

    #[test]
    fn every_user_appears_exactly_once() {
        let users = sample_users();
        let entries = flatten(&build_forest(&users));
        assert_eq!(entries.len(), users.len());

        let unique: HashSet<&str> = entries.iter().map(|e| e.user.id.as_str()).collect();
        assert_eq!(unique.len(), users.len());
        for entry in &entries {
            assert_eq!(entry.parent_id, entry.user.referred_by);
        }
    }

    #[test]
    fn child_listed_before_parent_is_still_attached() {
        let users = vec![user("late", Some("root")), user("root", None)];
        let forest = build_forest(&users);
        assert_eq!(ids(&forest), vec!["root"]);
        assert_eq!(ids(&forest[0].children), vec!["late"]);
    }

    #[test]
    fn unknown_referrer_becomes_root() {
        let users = vec![user("a", None), user("orphan", Some("deleted"))];
        let forest = build_forest(&users);
        assert_eq!(ids(&forest), vec!["a", "orphan"]);
    }

    #[test]
    fn cycle_members_are_left_out() {
        let users = vec![
            user("root", None),
            user("x", Some("y")),
            user("y", Some("x")),
            user("self", Some("self")),
        ];
        let forest = build_forest(&users);
        assert_eq!(ids(&forest), vec!["root"]);
        assert_eq!(forest[0].size(), 1);
    }

    #[test]
    fn takes_subtree_of_user() {
        let forest = build_forest(&sample_users());
        let dave = take_node(forest, "dave").unwrap();
        assert_eq!(dave.user.id, "dave");
        assert_eq!(ids(&dave.children), vec!["eve"]);

        assert!(take_node(build_forest(&sample_users()), "nobody").is_none());
    }

    #[test]
    fn branch_starts_at_user() {
        let users = sample_users();
        assert_eq!(
            entry_ids(&branch(&users, "dave").unwrap()),
            vec![("dave", None, 0), ("eve", Some("dave"), 1)]
        );
        assert!(branch(&users, "nobody").is_none());
    }

    #[test]
    fn branch_of_cycle_member_holds_only_the_user() {
        let users = vec![user("root", None), user("x", Some("y")), user("y", Some("x"))];
        assert_eq!(entry_ids(&branch(&users, "x").unwrap()), vec![("x", None, 0)]);
    }

    #[test]
    fn deep_chain_is_walked_without_recursion() {
        let depth = 50_000;
        let mut users = vec![user("u0", None)];
        for i in 1..depth {
            users.push(user(&format!("u{}", i), Some(&format!("u{}", i - 1))));
        }

        let forest = build_forest(&users);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].size(), depth);

        let entries = flatten(&forest);
        assert_eq!(entries.len(), depth);
        assert_eq!(entries[depth - 1].depth, (depth - 1) as u32);
        let json = serde_json::to_string(&entries).unwrap();
        assert!(json.contains("\"u49999\""));

        let lower = take_node(forest, "u25000").unwrap();
        assert_eq!(lower.size(), depth - 25_000);
        drop(lower);

        let half = branch(&users, "u40000").unwrap();
        assert_eq!(half.len(), depth - 40_000);
    }
}
