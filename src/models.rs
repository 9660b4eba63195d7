pub mod commissions;
pub mod referrals;
pub mod transactions;
pub mod users;
