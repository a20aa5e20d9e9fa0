pub mod conversion;
pub mod currency;
pub mod format;
pub mod pricing;
pub mod product;

pub use conversion::{ChargeQuote, CurrencyConversionService, CurrencyError, CurrencySettings, RateRefresh};
pub use currency::{Currency, CurrencyRegistry, ExchangeRateTable, RateTableError};
pub use format::Locale;
pub use pricing::{PriceQuote, PricingConfig, PricingEngine};
pub use product::{MembershipPlan, ProductError, Professional, Program, ServiceOffering};
