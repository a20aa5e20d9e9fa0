use chrono::{DateTime, Utc};
use kaivalya_core::backend::RatesSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A currency the marketplace can display prices in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Currency {
    pub code: String,
    pub symbol: String,
    pub name: String,
    pub flag: String,
    /// Digits after the decimal point when charging (JPY/KRW have none)
    pub minor_units: u32,
}

impl Currency {
    fn new(code: &str, symbol: &str, name: &str, flag: &str) -> Self {
        let minor_units = match code {
            "JPY" | "KRW" => 0,
            _ => 2,
        };
        Self {
            code: code.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            flag: flag.to_string(),
            minor_units,
        }
    }
}

/// The fixed set of supported currencies, in display order.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: Vec<Currency>,
}

impl CurrencyRegistry {
    pub fn standard() -> Self {
        let currencies = vec![
            Currency::new("AUD", "A$", "Australian Dollar", "🇦🇺"),
            Currency::new("USD", "$", "US Dollar", "🇺🇸"),
            Currency::new("INR", "₹", "Indian Rupee", "🇮🇳"),
            Currency::new("EUR", "€", "Euro", "🇪🇺"),
            Currency::new("GBP", "£", "British Pound", "🇬🇧"),
            Currency::new("CAD", "C$", "Canadian Dollar", "🇨🇦"),
            Currency::new("SGD", "S$", "Singapore Dollar", "🇸🇬"),
            Currency::new("AED", "د.إ", "UAE Dirham", "🇦🇪"),
            Currency::new("JPY", "¥", "Japanese Yen", "🇯🇵"),
            Currency::new("CNY", "¥", "Chinese Yuan", "🇨🇳"),
            Currency::new("CHF", "Fr", "Swiss Franc", "🇨🇭"),
            Currency::new("HKD", "HK$", "Hong Kong Dollar", "🇭🇰"),
            Currency::new("NZD", "NZ$", "New Zealand Dollar", "🇳🇿"),
            Currency::new("SEK", "kr", "Swedish Krona", "🇸🇪"),
            Currency::new("KRW", "₩", "South Korean Won", "🇰🇷"),
            Currency::new("BRL", "R$", "Brazilian Real", "🇧🇷"),
            Currency::new("RUB", "₽", "Russian Ruble", "🇷🇺"),
            Currency::new("ZAR", "R", "South African Rand", "🇿🇦"),
            Currency::new("MXN", "MX$", "Mexican Peso", "🇲🇽"),
            Currency::new("SAR", "﷼", "Saudi Riyal", "🇸🇦"),
        ];
        Self { currencies }
    }

    pub fn get(&self, code: &str) -> Option<&Currency> {
        self.currencies.iter().find(|c| c.code == code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Currency> {
        self.currencies.iter()
    }

    pub fn codes(&self) -> Vec<&str> {
        self.currencies.iter().map(|c| c.code.as_str()).collect()
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateTableError {
    #[error("Pivot currency {0} missing from rate table")]
    MissingPivot(String),

    #[error("Pivot currency {code} must have rate 1, got {rate}")]
    PivotNotUnit { code: String, rate: Decimal },

    #[error("Rate for {code} must be positive, got {rate}")]
    NonPositiveRate { code: String, rate: Decimal },

    #[error("No rate for currency {0}")]
    MissingRate(String),

    #[error("Converting {amount} from {from} to {to} overflowed")]
    Overflow { amount: Decimal, from: String, to: String },
}

/// Exchange rates relative to one pivot currency.
///
/// Immutable once built. Updates replace the whole table so a reader never sees a mix
/// of old and new rates.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRateTable {
    pivot: String,
    rates: HashMap<String, Decimal>,
    updated_at: DateTime<Utc>,
}

impl ExchangeRateTable {
    pub fn new(
        pivot: &str,
        rates: HashMap<String, Decimal>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, RateTableError> {
        let pivot_rate = rates
            .get(pivot)
            .copied()
            .ok_or_else(|| RateTableError::MissingPivot(pivot.to_string()))?;
        if pivot_rate != Decimal::ONE {
            return Err(RateTableError::PivotNotUnit {
                code: pivot.to_string(),
                rate: pivot_rate,
            });
        }
        if let Some((code, rate)) = rates.iter().find(|(_, rate)| **rate <= Decimal::ZERO) {
            return Err(RateTableError::NonPositiveRate {
                code: code.clone(),
                rate: *rate,
            });
        }

        Ok(Self {
            pivot: pivot.to_string(),
            rates,
            updated_at,
        })
    }

    /// Bundled rates, 1 USD = x.
    pub fn static_default() -> Self {
        let rates: HashMap<String, Decimal> = [
            ("USD", Decimal::new(1, 0)),
            ("AUD", Decimal::new(152, 2)),
            ("INR", Decimal::new(835, 1)),
            ("EUR", Decimal::new(92, 2)),
            ("GBP", Decimal::new(79, 2)),
            ("CAD", Decimal::new(137, 2)),
            ("SGD", Decimal::new(135, 2)),
            ("AED", Decimal::new(367, 2)),
            ("JPY", Decimal::new(15150, 2)),
            ("CNY", Decimal::new(723, 2)),
            ("CHF", Decimal::new(91, 2)),
            ("HKD", Decimal::new(783, 2)),
            ("NZD", Decimal::new(167, 2)),
            ("SEK", Decimal::new(1085, 2)),
            ("KRW", Decimal::new(1350, 0)),
            ("BRL", Decimal::new(515, 2)),
            ("RUB", Decimal::new(9250, 2)),
            ("ZAR", Decimal::new(1880, 2)),
            ("MXN", Decimal::new(1670, 2)),
            ("SAR", Decimal::new(375, 2)),
        ]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect();

        Self {
            pivot: "USD".to_string(),
            rates,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Build from a backend snapshot. The snapshot base is the pivot and gets rate 1
    /// if the backend left it out.
    pub fn from_snapshot(snapshot: RatesSnapshot) -> Result<Self, RateTableError> {
        let mut rates = snapshot.rates;
        rates.entry(snapshot.base.clone()).or_insert(Decimal::ONE);
        Self::new(&snapshot.base, rates, snapshot.updated_at)
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn rate(&self, code: &str) -> Option<Decimal> {
        self.rates.get(code).copied()
    }

    pub fn require_rate(&self, code: &str) -> Result<Decimal, RateTableError> {
        self.rate(code)
            .ok_or_else(|| RateTableError::MissingRate(code.to_string()))
    }

    /// Codes in `required` that this table has no rate for
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|code| !self.rates.contains_key(*code))
            .map(str::to_string)
            .collect()
    }

    /// `from` → pivot → `to`. Never uses a direct cross rate.
    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal, RateTableError> {
        let from_rate = self.require_rate(from)?;
        let to_rate = self.require_rate(to)?;
        amount
            .checked_div(from_rate)
            .and_then(|in_pivot| in_pivot.checked_mul(to_rate))
            .ok_or_else(|| RateTableError::Overflow {
                amount,
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    /// Units of `to` per unit of `from`
    pub fn cross_rate(&self, from: &str, to: &str) -> Result<Decimal, RateTableError> {
        self.convert(Decimal::ONE, from, to)
    }
}
