//! Service fee calculation
//!
//! The fee is computed once when a transaction is created and stored with it.
//! Payouts at capture read the stored fee back; they never re-apply a rate.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default platform fee rate (0.02 = 2%)
pub const DEFAULT_SERVICE_FEE_RATE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

/// Who bears the service fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceChargeOption {
    /// Buyer pays amount + fee; seller receives the full amount
    BuyerPays,
    /// Each side carries half the fee
    Split,
    /// Buyer pays the amount; the fee comes out of the seller's payout
    SellerPays,
}

impl ServiceChargeOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceChargeOption::BuyerPays => "BUYER_PAYS",
            ServiceChargeOption::Split => "SPLIT",
            ServiceChargeOption::SellerPays => "SELLER_PAYS",
        }
    }

    /// Part of `service_fee` added to what the buyer pays
    pub fn buyer_share(&self, service_fee: Decimal) -> Decimal {
        match self {
            ServiceChargeOption::BuyerPays => service_fee,
            ServiceChargeOption::Split => service_fee / Decimal::TWO,
            ServiceChargeOption::SellerPays => Decimal::ZERO,
        }
    }

    /// Part of `service_fee` deducted from the seller's payout
    pub fn seller_share(&self, service_fee: Decimal) -> Decimal {
        match self {
            ServiceChargeOption::BuyerPays => Decimal::ZERO,
            ServiceChargeOption::Split => service_fee / Decimal::TWO,
            ServiceChargeOption::SellerPays => service_fee,
        }
    }
}

impl fmt::Display for ServiceChargeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceChargeOption {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUYER_PAYS" => Ok(ServiceChargeOption::BuyerPays),
            "SPLIT" => Ok(ServiceChargeOption::Split),
            "SELLER_PAYS" => Ok(ServiceChargeOption::SellerPays),
            _ => Err(ValidationError::UnknownServiceChargeOption(s.to_string())),
        }
    }
}

/// Fee and buyer total fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub service_fee: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub rate: Decimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            rate: DEFAULT_SERVICE_FEE_RATE,
        }
    }
}

impl FeePolicy {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    /// `amount * rate`, rounded half-up to 2 decimal places.
    pub fn service_fee(&self, amount: Decimal) -> Decimal {
        (amount * self.rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// # Example
    /// ```
    /// use escrow_engine::escrow::fee::{FeePolicy, ServiceChargeOption};
    /// use rust_decimal::Decimal;
    ///
    /// let quote = FeePolicy::default().quote(Decimal::new(1000, 0), ServiceChargeOption::Split);
    /// assert_eq!(quote.service_fee, Decimal::new(2000, 2));
    /// assert_eq!(quote.total_amount, Decimal::new(101000, 2));
    /// ```
    pub fn quote(&self, amount: Decimal, option: ServiceChargeOption) -> FeeQuote {
        let service_fee = self.service_fee(amount);
        FeeQuote {
            service_fee,
            total_amount: amount + option.buyer_share(service_fee),
        }
    }
}

/// What the seller receives when `auth_amount` is captured.
#[inline]
pub fn seller_payout(
    auth_amount: Decimal,
    option: ServiceChargeOption,
    service_fee: Decimal,
) -> Decimal {
    auth_amount - option.seller_share(service_fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_rate() {
        assert_eq!(DEFAULT_SERVICE_FEE_RATE, d("0.02"));
    }

    #[test]
    fn test_quote_per_option() {
        let policy = FeePolicy::default();
        let amount = d("1000");

        let q = policy.quote(amount, ServiceChargeOption::BuyerPays);
        assert_eq!(q.service_fee, d("20.00"));
        assert_eq!(q.total_amount, d("1020.00"));

        let q = policy.quote(amount, ServiceChargeOption::Split);
        assert_eq!(q.service_fee, d("20.00"));
        assert_eq!(q.total_amount, d("1010.00"));

        let q = policy.quote(amount, ServiceChargeOption::SellerPays);
        assert_eq!(q.service_fee, d("20.00"));
        assert_eq!(q.total_amount, d("1000"));
    }

    #[test]
    fn test_fee_rounds_half_up() {
        let policy = FeePolicy::default();
        // 0.625 -> 0.63
        assert_eq!(policy.service_fee(d("31.25")), d("0.63"));
        // 0.2466 -> 0.25
        assert_eq!(policy.service_fee(d("12.33")), d("0.25"));
    }

    #[test]
    fn test_split_keeps_odd_cent() {
        // fee 0.63, buyer carries 0.315 exactly
        let q = FeePolicy::default().quote(d("31.25"), ServiceChargeOption::Split);
        assert_eq!(q.total_amount, d("31.565"));
    }

    #[test]
    fn test_seller_payout() {
        let fee = d("20.00");
        let amount = d("1000");
        assert_eq!(seller_payout(amount, ServiceChargeOption::BuyerPays, fee), d("1000"));
        assert_eq!(seller_payout(amount, ServiceChargeOption::Split, fee), d("990.00"));
        assert_eq!(seller_payout(amount, ServiceChargeOption::SellerPays, fee), d("980.00"));
    }

    #[test]
    fn test_custom_rate() {
        let policy = FeePolicy::new(d("0.025"));
        assert_eq!(policy.service_fee(d("200")), d("5.00"));
    }

    #[test]
    fn test_parse_option() {
        assert_eq!("split".parse::<ServiceChargeOption>().unwrap(), ServiceChargeOption::Split);
        assert_eq!(
            "SELLER_PAYS".parse::<ServiceChargeOption>().unwrap(),
            ServiceChargeOption::SellerPays
        );
        assert_eq!(
            "FREE".parse::<ServiceChargeOption>(),
            Err(ValidationError::UnknownServiceChargeOption("FREE".to_string()))
        );
    }
}
