//! Referral program rules: the payout table, the commission cascade, the
//! referral forest and per-user statistics. Nothing in here touches storage.

pub mod cascade;
pub mod payouts;
pub mod stats;
pub mod tree;

pub use cascade::{cascade, CommissionShare};
pub use payouts::{PayoutError, PayoutTable};
pub use tree::{branch, build_forest, flatten, take_node};
