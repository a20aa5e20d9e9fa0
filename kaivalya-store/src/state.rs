use kaivalya_booking::{BookingWizard, Purchase};
use kaivalya_catalog::{
    CurrencyConversionService, CurrencyRegistry, ExchangeRateTable, PricingEngine, Professional, RateRefresh,
    ServiceOffering,
};
use kaivalya_order::gateways::{DomesticCheckoutSdk, InternationalButtonsSdk};
use kaivalya_order::{DomesticGateway, InternationalGateway, OrderLifecycleCoordinator, PaymentGatewayRouter};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app_config::Config;
use crate::error::StoreError;
use crate::events::JsonlEventSink;
use crate::http_backend::HttpBackend;
use crate::preference_store::FilePreferenceStore;
use crate::telemetry;

/// Provider UIs supplied by the host
#[derive(Clone)]
pub struct GatewaySdks {
    pub domestic: Arc<dyn DomesticCheckoutSdk>,
    pub international: Arc<dyn InternationalButtonsSdk>,
}

/// The checkout stack wired from one [`Config`]
#[derive(Clone)]
pub struct CheckoutState {
    pub config: Config,
    pub backend: Arc<HttpBackend>,
    pub preferences: Arc<FilePreferenceStore>,
    pub events: Arc<JsonlEventSink>,
    pub currency: Arc<CurrencyConversionService>,
    pub coordinator: Arc<OrderLifecycleCoordinator>,
}

impl CheckoutState {
    /// Install logging, load config from `dir` and wire everything
    pub fn bootstrap(dir: impl AsRef<Path>, sdks: GatewaySdks) -> Result<Self, StoreError> {
        if let Err(e) = telemetry::init(telemetry::DEFAULT_FILTER) {
            warn!("Keeping the existing log subscriber: {}", e);
        }
        let config = Config::load_from(dir)?;
        Self::build(config, sdks)
    }

    pub fn build(config: Config, sdks: GatewaySdks) -> Result<Self, StoreError> {
        let backend = Arc::new(HttpBackend::new(&config.backend, config.currency.base_code.clone())?);
        let preferences = Arc::new(FilePreferenceStore::open(config.storage.preferences_path.clone())?);
        let events = Arc::new(JsonlEventSink::new(config.storage.events_path.clone()));

        let currency = Arc::new(CurrencyConversionService::new(
            config.currency.settings(),
            CurrencyRegistry::standard(),
            ExchangeRateTable::static_default(),
            preferences.clone(),
        )?);

        let router = PaymentGatewayRouter::new(
            Arc::new(DomesticGateway::new(backend.clone(), sdks.domestic)),
            Arc::new(InternationalGateway::new(backend.clone(), sdks.international)),
        );
        let coordinator = Arc::new(OrderLifecycleCoordinator::new(
            backend.clone(),
            router,
            currency.clone(),
            events.clone(),
            config.coordinator_settings(),
        ));

        info!(
            "Checkout wired to {} (events in {})",
            config.backend.base_url,
            config.storage.events_path.display()
        );
        Ok(Self {
            config,
            backend,
            preferences,
            events,
            currency,
            coordinator,
        })
    }

    /// Pull exchange rates when the current table is older than the configured age
    pub async fn refresh_rates(&self) -> RateRefresh {
        self.currency
            .refresh_rates(self.backend.as_ref(), self.config.currency.rates_max_age())
            .await
    }

    pub fn pricing(&self) -> PricingEngine {
        PricingEngine::new(self.config.pricing())
    }

    pub fn booking_wizard(&self, professional: Professional, services: Vec<ServiceOffering>) -> BookingWizard {
        BookingWizard::new(
            professional,
            services,
            self.pricing(),
            self.coordinator.clone(),
            self.config.wizard_settings(),
        )
    }

    pub fn purchase<'a>(&'a self, pricing: &'a PricingEngine) -> Purchase<'a> {
        let purchase = Purchase::new(&self.coordinator, pricing);
        match &self.config.checkout.country_code {
            Some(country) => purchase.with_country(country.clone()),
            None => purchase,
        }
    }
}
