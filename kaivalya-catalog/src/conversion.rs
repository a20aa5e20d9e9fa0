use chrono::Utc;
use kaivalya_core::backend::RateSource;
use kaivalya_core::preferences::PreferenceStore;
use kaivalya_shared::models::events::CurrencyChangedEvent;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::currency::{Currency, CurrencyRegistry, ExchangeRateTable, RateTableError};
use crate::format::{self, Locale};

#[derive(Debug, Clone)]
pub struct CurrencySettings {
    /// Currency every catalog price is authored in
    pub base_code: String,
    /// Display currency when nothing valid was persisted
    pub default_code: String,
    /// Preference key holding the selected display currency
    pub storage_key: String,
    pub locale: String,
}

impl Default for CurrencySettings {
    fn default() -> Self {
        Self {
            base_code: "AUD".to_string(),
            default_code: "AUD".to_string(),
            storage_key: "selectedCurrency".to_string(),
            locale: "en-US".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurrencyError {
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    #[error("Rate table rejected: {0}")]
    RateTable(#[from] RateTableError),

    #[error("Rate table is missing currencies: {0:?}")]
    IncompleteRates(Vec<String>),
}

/// What a payer is charged for a base-currency total
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeQuote {
    /// Rounded to the currency's minor units
    pub amount: Decimal,
    pub currency: String,
    /// Units of `currency` per unit of base currency
    pub exchange_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateRefresh {
    /// Current table is younger than the max age; nothing fetched
    Fresh,
    Replaced,
    /// Fetch or validation failed; the previous table stays in use
    KeptStale(String),
}

/// Converts and formats prices, and owns the user's display-currency selection.
///
/// One instance is shared by every price display. Selection changes are persisted
/// through the preference store and broadcast to subscribers so they re-render.
pub struct CurrencyConversionService {
    registry: CurrencyRegistry,
    settings: CurrencySettings,
    locale: Locale,
    rates: RwLock<Arc<ExchangeRateTable>>,
    selected: RwLock<String>,
    store: Arc<dyn PreferenceStore>,
    changes: broadcast::Sender<CurrencyChangedEvent>,
}

impl CurrencyConversionService {
    pub fn new(
        settings: CurrencySettings,
        registry: CurrencyRegistry,
        rates: ExchangeRateTable,
        store: Arc<dyn PreferenceStore>,
    ) -> Result<Self, CurrencyError> {
        for code in [&settings.base_code, &settings.default_code] {
            if !registry.contains(code) {
                return Err(CurrencyError::UnknownCurrency(code.clone()));
            }
        }
        let missing = rates.missing(registry.codes());
        if !missing.is_empty() {
            return Err(CurrencyError::IncompleteRates(missing));
        }

        let selected = match store.get(&settings.storage_key) {
            Ok(Some(code)) if registry.contains(&code) => code,
            Ok(Some(code)) => {
                warn!("Ignoring persisted currency {}: not supported", code);
                settings.default_code.clone()
            }
            Ok(None) => settings.default_code.clone(),
            Err(e) => {
                warn!("Could not read persisted currency: {}", e);
                settings.default_code.clone()
            }
        };

        let (changes, _) = broadcast::channel(16);
        Ok(Self {
            locale: Locale::parse(&settings.locale),
            registry,
            settings,
            rates: RwLock::new(Arc::new(rates)),
            selected: RwLock::new(selected),
            store,
            changes,
        })
    }

    /// Standard registry, bundled rates, default settings
    pub fn with_defaults(store: Arc<dyn PreferenceStore>) -> Result<Self, CurrencyError> {
        Self::new(
            CurrencySettings::default(),
            CurrencyRegistry::standard(),
            ExchangeRateTable::static_default(),
            store,
        )
    }

    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }

    pub fn base_code(&self) -> &str {
        &self.settings.base_code
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Current table snapshot. Conversions done against one snapshot are consistent
    /// with each other even if the table is replaced meanwhile.
    pub fn rates(&self) -> Arc<ExchangeRateTable> {
        match self.rates.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Convert an amount in the base currency to `target_code`
    pub fn convert(&self, amount_in_base: Decimal, target_code: &str) -> Result<Decimal, CurrencyError> {
        self.convert_between(amount_in_base, &self.settings.base_code, target_code)
    }

    pub fn convert_between(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal, CurrencyError> {
        for code in [from, to] {
            if !self.registry.contains(code) {
                return Err(CurrencyError::UnknownCurrency(code.to_string()));
            }
        }
        if from == to {
            return Ok(amount);
        }
        Ok(self.rates().convert(amount, from, to)?)
    }

    /// Units of `target_code` per unit of base currency
    pub fn rate_for(&self, target_code: &str) -> Result<Decimal, CurrencyError> {
        self.convert(Decimal::ONE, target_code)
    }

    /// Round to the currency's minor units (cents, paise; whole yen)
    pub fn round_to_minor(&self, amount: Decimal, code: &str) -> Result<Decimal, CurrencyError> {
        let currency = self.currency(code)?;
        Ok(amount.round_dp_with_strategy(currency.minor_units, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Convert once and round once. Amount and rate come from the same table snapshot.
    pub fn charge_quote(&self, amount_in_base: Decimal, target_code: &str) -> Result<ChargeQuote, CurrencyError> {
        let currency = self.currency(target_code)?;
        let base = self.settings.base_code.as_str();
        let (converted, exchange_rate) = if base == target_code {
            (amount_in_base, Decimal::ONE)
        } else {
            let rates = self.rates();
            (
                rates.convert(amount_in_base, base, target_code)?,
                rates.cross_rate(base, target_code)?,
            )
        };

        Ok(ChargeQuote {
            amount: converted.round_dp_with_strategy(currency.minor_units, RoundingStrategy::MidpointAwayFromZero),
            currency: currency.code.clone(),
            exchange_rate,
        })
    }

    /// Whole-unit display string. Never fails.
    pub fn format(&self, amount: f64, code: &str, locale: Locale) -> String {
        self.format_digits(amount, code, locale, 0)
    }

    /// Display string with the currency's minor units, for charge summaries. Never fails.
    pub fn format_minor(&self, amount: f64, code: &str, locale: Locale) -> String {
        let digits = self.registry.get(code).map(|c| c.minor_units).unwrap_or(2);
        self.format_digits(amount, code, locale, digits)
    }

    /// Convert a base-currency price to the selected currency and format it
    pub fn format_price(&self, amount_in_base: Decimal) -> String {
        let code = self.selected_code();
        let converted = self
            .convert(amount_in_base, &code)
            .ok()
            .and_then(|d| d.to_f64())
            .unwrap_or(f64::NAN);
        self.format(converted, &code, self.locale)
    }

    fn format_digits(&self, amount: f64, code: &str, locale: Locale, digits: u32) -> String {
        let result = match self.registry.get(code) {
            Some(currency) => format::format_currency(amount, currency, locale, digits),
            None => Err(format::FormatError::UnknownCurrency(code.to_string())),
        };

        match result {
            Ok(s) => s,
            Err(e) => {
                debug!("Falling back to plain price rendering: {}", e);
                let symbol = self.registry.get(code).map(|c| c.symbol.as_str()).unwrap_or("$");
                format::fallback(symbol, amount)
            }
        }
    }

    pub fn selected_code(&self) -> String {
        match self.selected.read() {
            Ok(code) => code.to_string(),
            Err(poisoned) => poisoned.into_inner().to_string(),
        }
    }

    pub fn get_selected(&self) -> Currency {
        let code = self.selected_code();
        self.registry
            .get(&code)
            .or_else(|| self.registry.get(&self.settings.default_code))
            .cloned()
            .unwrap_or_else(|| Currency {
                code: code.clone(),
                symbol: "$".to_string(),
                name: code,
                flag: String::new(),
                minor_units: 2,
            })
    }

    /// Change the display currency. Unknown codes are rejected and leave the
    /// selection as it was.
    pub fn select(&self, code: &str) -> Result<(), CurrencyError> {
        if !self.registry.contains(code) {
            return Err(CurrencyError::UnknownCurrency(code.to_string()));
        }

        let previous = {
            let mut selected = match self.selected.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *selected, code.to_string())
        };

        if let Err(e) = self.store.set(&self.settings.storage_key, code) {
            warn!("Failed to persist currency selection {}: {}", code, e);
        }

        if previous != code {
            info!("Display currency changed {} -> {}", previous, code);
            // No receivers is fine: nothing is rendering prices right now
            let _ = self.changes.send(CurrencyChangedEvent {
                previous,
                current: code.to_string(),
                timestamp: Utc::now().timestamp(),
            });
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CurrencyChangedEvent> {
        self.changes.subscribe()
    }

    /// Swap in a new rate table. Tables that do not cover every supported currency
    /// are rejected whole.
    pub fn replace_rates(&self, table: ExchangeRateTable) -> Result<(), CurrencyError> {
        let missing = table.missing(self.registry.codes());
        if !missing.is_empty() {
            return Err(CurrencyError::IncompleteRates(missing));
        }

        let mut rates = match self.rates.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!("Exchange rates replaced (pivot {}, as of {})", table.pivot(), table.updated_at());
        *rates = Arc::new(table);
        Ok(())
    }

    /// Refresh from the backend when the current table is older than `max_age`.
    /// Failures keep the stale table.
    pub async fn refresh_rates(&self, source: &dyn RateSource, max_age: chrono::Duration) -> RateRefresh {
        let age = Utc::now() - self.rates().updated_at();
        if age < max_age {
            return RateRefresh::Fresh;
        }

        let snapshot = match source.fetch_rates().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Exchange rate fetch failed, using stale rates: {}", e);
                return RateRefresh::KeptStale(e.to_string());
            }
        };

        let outcome = ExchangeRateTable::from_snapshot(snapshot)
            .map_err(CurrencyError::from)
            .and_then(|table| self.replace_rates(table));
        match outcome {
            Ok(()) => RateRefresh::Replaced,
            Err(e) => {
                warn!("Exchange rate snapshot rejected, using stale rates: {}", e);
                RateRefresh::KeptStale(e.to_string())
            }
        }
    }

    fn currency(&self, code: &str) -> Result<&Currency, CurrencyError> {
        self.registry
            .get(code)
            .ok_or_else(|| CurrencyError::UnknownCurrency(code.to_string()))
    }
}
