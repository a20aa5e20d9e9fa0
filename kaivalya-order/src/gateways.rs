use async_trait::async_trait;
use kaivalya_core::backend::{CheckoutBackend, CreateOrderRequest, CreatedOrder};
use kaivalya_core::payment::{
    GatewayAdapter, GatewayCallbacks, GatewayCheckout, GatewayProvider, RemoteOrder, RemoteOrderRequest,
};
use kaivalya_core::{CoreError, CoreResult};
use kaivalya_shared::Masked;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::debug;

/// Currencies the international provider settles in
pub const INTERNATIONAL_CURRENCIES: [&str; 10] =
    ["USD", "EUR", "GBP", "AUD", "CAD", "JPY", "CNY", "CHF", "NZD", "SGD"];

/// Fallback when the display currency is not supported internationally
pub const INTERNATIONAL_FALLBACK: &str = "USD";

/// Options the domestic checkout widget takes. Amounts are in paise.
#[derive(Debug, Clone)]
pub struct DomesticCheckoutOptions {
    pub key: Masked<String>,
    pub amount_paise: i64,
    pub currency: String,
    pub order_id: String,
    pub name: String,
    pub description: String,
}

/// The domestic provider's checkout widget
#[async_trait]
pub trait DomesticCheckoutSdk: Send + Sync {
    async fn open(&self, options: DomesticCheckoutOptions, callbacks: GatewayCallbacks) -> CoreResult<()>;
}

/// Options for the international provider's buttons. The amount is a decimal string.
#[derive(Debug, Clone)]
pub struct InternationalButtonOptions {
    pub client_id: Masked<String>,
    pub order_id: String,
    pub currency: String,
    pub amount: String,
}

/// The international provider's button renderer
#[async_trait]
pub trait InternationalButtonsSdk: Send + Sync {
    async fn render(&self, options: InternationalButtonOptions, callbacks: GatewayCallbacks) -> CoreResult<()>;
}

async fn register_with_backend(
    backend: &dyn CheckoutBackend,
    provider: GatewayProvider,
    request: &RemoteOrderRequest,
) -> CoreResult<RemoteOrder> {
    let created: CreatedOrder = backend
        .create_order(&CreateOrderRequest {
            provider,
            amount: request.amount,
            currency: request.currency.clone(),
            description: request.description.clone(),
            base_amount: request.base_amount,
            base_currency: request.base_currency.clone(),
            exchange_rate: request.exchange_rate,
            country_code: request.country_code.clone(),
        })
        .await?;

    let public_key = match created.public_key {
        Some(key) => key,
        None => {
            debug!("Order {} came back without a key, fetching {} config", created.order_id, provider);
            backend.gateway_config(provider).await?.public_key
        }
    };

    Ok(RemoteOrder {
        order_id: created.order_id,
        provider_order_id: created.gateway_order_id,
        public_key,
    })
}

/// Rupee checkout through the domestic provider
pub struct DomesticGateway {
    backend: Arc<dyn CheckoutBackend>,
    sdk: Arc<dyn DomesticCheckoutSdk>,
}

impl DomesticGateway {
    pub fn new(backend: Arc<dyn CheckoutBackend>, sdk: Arc<dyn DomesticCheckoutSdk>) -> Self {
        Self { backend, sdk }
    }
}

#[async_trait]
impl GatewayAdapter for DomesticGateway {
    fn provider(&self) -> GatewayProvider {
        GatewayProvider::Razorpay
    }

    fn settlement_currency(&self, _display_currency: &str) -> String {
        "INR".to_string()
    }

    async fn create_remote_order(&self, request: &RemoteOrderRequest) -> CoreResult<RemoteOrder> {
        register_with_backend(self.backend.as_ref(), self.provider(), request).await
    }

    async fn open(&self, checkout: GatewayCheckout, callbacks: GatewayCallbacks) -> CoreResult<()> {
        if checkout.currency != "INR" {
            return Err(CoreError::GatewayError(format!(
                "domestic checkout cannot charge {}",
                checkout.currency
            )));
        }
        let amount_paise = to_minor_units(checkout.amount, checkout.minor_units)?;

        self.sdk
            .open(
                DomesticCheckoutOptions {
                    key: checkout.key,
                    amount_paise,
                    currency: checkout.currency,
                    order_id: checkout.provider_order_id,
                    name: checkout.merchant_name,
                    description: checkout.description,
                },
                callbacks,
            )
            .await
    }
}

/// Card and wallet checkout for everyone outside India
pub struct InternationalGateway {
    backend: Arc<dyn CheckoutBackend>,
    sdk: Arc<dyn InternationalButtonsSdk>,
}

impl InternationalGateway {
    pub fn new(backend: Arc<dyn CheckoutBackend>, sdk: Arc<dyn InternationalButtonsSdk>) -> Self {
        Self { backend, sdk }
    }

    pub fn supports(currency: &str) -> bool {
        INTERNATIONAL_CURRENCIES.contains(&currency)
    }
}

#[async_trait]
impl GatewayAdapter for InternationalGateway {
    fn provider(&self) -> GatewayProvider {
        GatewayProvider::PayPal
    }

    fn settlement_currency(&self, display_currency: &str) -> String {
        if Self::supports(display_currency) {
            display_currency.to_string()
        } else {
            INTERNATIONAL_FALLBACK.to_string()
        }
    }

    async fn create_remote_order(&self, request: &RemoteOrderRequest) -> CoreResult<RemoteOrder> {
        if !Self::supports(&request.currency) {
            return Err(CoreError::GatewayError(format!(
                "international checkout does not support {}",
                request.currency
            )));
        }
        register_with_backend(self.backend.as_ref(), self.provider(), request).await
    }

    async fn open(&self, checkout: GatewayCheckout, callbacks: GatewayCallbacks) -> CoreResult<()> {
        let scale = checkout.minor_units;
        let amount = checkout
            .amount
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);

        self.sdk
            .render(
                InternationalButtonOptions {
                    client_id: checkout.key,
                    order_id: checkout.provider_order_id,
                    currency: checkout.currency,
                    amount: format!("{:.*}", scale as usize, amount),
                },
                callbacks,
            )
            .await
    }
}

/// Integer minor units (paise, cents) for SDKs that take them
pub fn to_minor_units(amount: Decimal, minor_units: u32) -> CoreResult<i64> {
    10i64
        .checked_pow(minor_units)
        .and_then(|factor| amount.checked_mul(Decimal::from(factor)))
        .and_then(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64())
        .ok_or_else(|| CoreError::GatewayError(format!("amount {} out of range", amount)))
}
