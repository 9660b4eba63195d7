use rand::Rng;
use serde::Serialize;

pub const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const REFERRAL_CODE_LEN: usize = 8;

pub const DEFAULT_PRODUCT_PRICE_IN_CENTS: i64 = 150 * 100;
pub const DEFAULT_COMMISSION_TOTAL_IN_CENTS: i64 = 50 * 100;
pub const DEFAULT_LEVELS_IN_CENTS: [i64; 10] = [
    10 * 100,
    6 * 100,
    4 * 100,
    3 * 100,
    2 * 100,
    2 * 100,
    3 * 100,
    4 * 100,
    6 * 100,
    10 * 100,
];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PayoutError {
    #[error("Payout table is empty")]
    Empty,
    #[error("Payout table has {0} levels, at most 255 are supported")]
    TooManyLevels(usize),
    #[error("Level {level} has a negative payout: {amount}")]
    NegativePayout { level: usize, amount: i64 },
    #[error("Payout table sums to {actual}, expected the commission total {expected}")]
    SumMismatch { actual: i64, expected: i64 },
    #[error("Commission total {commission_total} exceeds the product price {product_price}")]
    ExceedsPrice {
        commission_total: i64,
        product_price: i64,
    },
}

/// Fixed per-level commission amounts, level 1 being the purchaser's direct
/// referrer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PayoutTable {
    levels: Vec<i64>,
    commission_total_in_cents: i64,
    product_price_in_cents: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct LevelInfo {
    pub level: u8,
    pub amount_in_cents: i64,
    pub percent_of_price: f64,
    pub description: String,
}

impl PayoutTable {
    pub fn new(
        levels: Vec<i64>,
        commission_total_in_cents: i64,
        product_price_in_cents: i64,
    ) -> Result<Self, PayoutError> {
        if levels.is_empty() {
            return Err(PayoutError::Empty);
        }
        if levels.len() > u8::MAX as usize {
            return Err(PayoutError::TooManyLevels(levels.len()));
        }
        if let Some((idx, &amount)) = levels.iter().enumerate().find(|(_, a)| **a < 0) {
            return Err(PayoutError::NegativePayout {
                level: idx + 1,
                amount,
            });
        }

        let actual: i64 = levels.iter().sum();
        if actual != commission_total_in_cents {
            return Err(PayoutError::SumMismatch {
                actual,
                expected: commission_total_in_cents,
            });
        }
        if commission_total_in_cents > product_price_in_cents {
            return Err(PayoutError::ExceedsPrice {
                commission_total: commission_total_in_cents,
                product_price: product_price_in_cents,
            });
        }

        Ok(Self {
            levels,
            commission_total_in_cents,
            product_price_in_cents,
        })
    }

    /// 150 product price, 50 distributed over 10 levels.
    pub fn standard() -> Self {
        Self {
            levels: DEFAULT_LEVELS_IN_CENTS.to_vec(),
            commission_total_in_cents: DEFAULT_COMMISSION_TOTAL_IN_CENTS,
            product_price_in_cents: DEFAULT_PRODUCT_PRICE_IN_CENTS,
        }
    }

    pub fn max_level(&self) -> u8 {
        self.levels.len() as u8
    }

    /// Payout for a 1-based level, zero outside the table.
    pub fn payout(&self, level: u8) -> i64 {
        match level {
            0 => 0,
            l => self.levels.get(l as usize - 1).copied().unwrap_or(0),
        }
    }

    pub fn levels(&self) -> &[i64] {
        &self.levels
    }

    pub fn commission_total_in_cents(&self) -> i64 {
        self.commission_total_in_cents
    }

    pub fn product_price_in_cents(&self) -> i64 {
        self.product_price_in_cents
    }

    pub fn describe(&self) -> Vec<LevelInfo> {
        self.levels
            .iter()
            .enumerate()
            .map(|(idx, &amount)| {
                let level = (idx + 1) as u8;
                let percent = amount as f64 * 100.0 / self.product_price_in_cents as f64;
                let description = if level == 1 {
                    "Direct referrals you personally invited".to_string()
                } else {
                    format!("People invited by your level {} referrals", level - 1)
                };

                LevelInfo {
                    level,
                    amount_in_cents: amount,
                    percent_of_price: (percent * 100.0).round() / 100.0,
                    description,
                }
            })
            .collect()
    }

    /// Projected earnings of a network where `network[i]` is the number of
    /// referrals each member at depth `i` brings in (depth 0 being you).
    /// Depths past the table earn nothing.
    pub fn potential_earnings(&self, network: &[u64]) -> i64 {
        let mut members: i64 = 1;
        let mut earnings: i64 = 0;

        for (idx, &fan_out) in network.iter().take(self.levels.len()).enumerate() {
            let fan_out = i64::try_from(fan_out).unwrap_or(i64::MAX);
            members = members.saturating_mul(fan_out);
            earnings = earnings.saturating_add(members.saturating_mul(self.levels[idx]));
        }

        earnings
    }
}

pub fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();

    (0..REFERRAL_CODE_LEN)
        .map(|_| REFERRAL_CODE_ALPHABET[rng.gen_range(0..REFERRAL_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn referral_link(public_url: &str, referral_code: &str) -> String {
    format!(
        "{}/register?ref={}",
        public_url.trim_end_matches('/'),
        referral_code
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_sums_to_commission_total() {
        let table = PayoutTable::standard();
        let validated = PayoutTable::new(
            table.levels().to_vec(),
            table.commission_total_in_cents(),
            table.product_price_in_cents(),
        );

        assert_eq!(validated, Ok(table.clone()));
        assert_eq!(table.levels().iter().sum::<i64>(), 5000);
        assert_eq!(table.max_level(), 10);
    }

    #[test]
    fn standard_table_is_symmetric() {
        let levels = PayoutTable::standard().levels().to_vec();
        let mut reversed = levels.clone();
        reversed.reverse();
        assert_eq!(levels, reversed);
    }

    #[test]
    fn rejects_table_not_matching_total() {
        let err = PayoutTable::new(vec![1000, 600], 5000, 15000).unwrap_err();
        assert_eq!(
            err,
            PayoutError::SumMismatch {
                actual: 1600,
                expected: 5000
            }
        );
    }

    #[test]
    fn rejects_degenerate_tables() {
        assert_eq!(PayoutTable::new(vec![], 0, 100), Err(PayoutError::Empty));
        assert_eq!(
            PayoutTable::new(vec![10, -5, 5], 10, 100),
            Err(PayoutError::NegativePayout {
                level: 2,
                amount: -5
            })
        );
        assert_eq!(
            PayoutTable::new(vec![1; 256], 256, 1000),
            Err(PayoutError::TooManyLevels(256))
        );
        assert_eq!(
            PayoutTable::new(vec![200], 200, 100),
            Err(PayoutError::ExceedsPrice {
                commission_total: 200,
                product_price: 100
            })
        );
    }

    #[test]
    fn payout_outside_table_is_zero() {
        let table = PayoutTable::standard();
        assert_eq!(table.payout(0), 0);
        assert_eq!(table.payout(1), 1000);
        assert_eq!(table.payout(10), 1000);
        assert_eq!(table.payout(11), 0);
    }

    #[test]
    fn describes_levels_relative_to_price() {
        let info = PayoutTable::standard().describe();
        assert_eq!(info.len(), 10);
        assert_eq!(info[0].percent_of_price, 6.67);
        assert_eq!(info[0].description, "Direct referrals you personally invited");
        assert_eq!(info[2].description, "People invited by your level 2 referrals");
        assert_eq!(info[4].percent_of_price, 1.33);
    }

    #[test]
    fn projects_earning_potential() {
        let table = PayoutTable::standard();
        assert_eq!(table.potential_earnings(&[5]), 5 * 1000);
        assert_eq!(table.potential_earnings(&[10]), 10 * 1000);
        assert_eq!(table.potential_earnings(&[10, 5]), 10 * 1000 + 50 * 600);
        assert_eq!(table.potential_earnings(&[]), 0);
        assert_eq!(table.potential_earnings(&[u64::MAX; 12]), i64::MAX);
    }

    #[test]
    fn referral_codes_use_unambiguous_alphabet() {
        for _ in 0..100 {
            let code = generate_referral_code();
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert!(code.bytes().all(|b| REFERRAL_CODE_ALPHABET.contains(&b)));
            assert!(!code.contains(['0', '1', 'I', 'O']));
        }
    }

    #[test]
    fn builds_referral_link() {
        assert_eq!(
            referral_link("https://mlm.example.com/", "ABCD2345"),
            "https://mlm.example.com/register?ref=ABCD2345"
        );
    }
}
