use kaivalya_booking::WizardSettings;
use kaivalya_catalog::{CurrencySettings, PricingConfig};
use kaivalya_order::CoordinatorSettings;
use kaivalya_shared::Masked;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub currency: CurrencyConfig,
    pub checkout: CheckoutConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub bearer_token: Option<Masked<String>>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurrencyConfig {
    pub base_code: String,
    pub default_code: String,
    pub storage_key: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub rates_max_age_hours: i64,
}

fn default_locale() -> String {
    "en-US".to_string()
}

impl CurrencyConfig {
    pub fn settings(&self) -> CurrencySettings {
        CurrencySettings {
            base_code: self.base_code.clone(),
            default_code: self.default_code.clone(),
            storage_key: self.storage_key.clone(),
            locale: self.locale.clone(),
        }
    }

    pub fn rates_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rates_max_age_hours)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckoutConfig {
    pub platform_fee: Decimal,
    pub min_reason_chars: usize,
    pub merchant_name: String,
    /// Payer country when the deployment knows it, e.g. "IN"
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default = "default_booking_window_days")]
    pub booking_window_days: u64,
}

fn default_booking_window_days() -> u64 {
    14
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub preferences_path: PathBuf,
    pub events_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Layered load: `default` (required), `{RUN_MODE}` and `local` (optional) from
    /// `dir`, then `KAIVALYA__SECTION__KEY` environment overrides.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let dir = dir.as_ref();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::from(dir.join("default")))
            .add_source(config::File::from(dir.join(&run_mode)).required(false))
            // Not checked in
            .add_source(config::File::from(dir.join("local")).required(false))
            .add_source(config::Environment::with_prefix("KAIVALYA").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            platform_fee: self.checkout.platform_fee,
            base_currency: self.currency.base_code.clone(),
        }
    }

    pub fn wizard_settings(&self) -> WizardSettings {
        WizardSettings {
            min_reason_chars: self.checkout.min_reason_chars,
            country_code: self.checkout.country_code.clone(),
            booking_window_days: self.checkout.booking_window_days,
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            request_timeout: self.backend.request_timeout(),
            merchant_name: self.checkout.merchant_name.clone(),
        }
    }
}
