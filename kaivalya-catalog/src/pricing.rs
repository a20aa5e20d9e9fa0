use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::product::{MembershipPlan, Program, ServiceOffering};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Flat fee added to every class booking, in the base currency
    pub platform_fee: Decimal,

    /// Currency all catalog prices are quoted in
    pub base_currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            platform_fee: Decimal::new(5, 0),
            base_currency: "AUD".to_string(),
        }
    }
}

/// Price breakdown in the base currency. Conversion to the display currency
/// happens later, at render and charge time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub item_price: Decimal,
    pub platform_fee: Decimal,
    pub total: Decimal,
    pub currency: String,
}

pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Service price plus the platform fee
    pub fn quote_booking(&self, service: &ServiceOffering) -> PriceQuote {
        self.quote(service.price, self.config.platform_fee)
    }

    pub fn quote_membership(&self, plan: MembershipPlan) -> PriceQuote {
        self.quote(plan.base_price(), Decimal::ZERO)
    }

    pub fn quote_program(&self, program: &Program) -> PriceQuote {
        self.quote(program.price, Decimal::ZERO)
    }

    fn quote(&self, item_price: Decimal, platform_fee: Decimal) -> PriceQuote {
        PriceQuote {
            item_price,
            platform_fee,
            total: item_price + platform_fee,
            currency: self.config.base_currency.clone(),
        }
    }
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
