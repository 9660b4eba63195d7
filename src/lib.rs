//! Multi-level referral program backend.
//!
//! Users register under an optional referrer, purchase the product, and every
//! purchase pays a fixed commission to each of the purchaser's ancestors up to
//! the depth of the payout table.

pub mod mlm;
pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;
