use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kaivalya_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::payment::GatewayProvider;
use crate::CoreResult;

/// Which domain record a verified payment is turned into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    Booking,
    Membership,
    Enrollment,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Booking => "booking",
            FlowType::Membership => "membership",
            FlowType::Enrollment => "enrollment",
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub provider: GatewayProvider,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub base_amount: Decimal,
    pub base_currency: String,
    pub exchange_rate: Decimal,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub order_id: String,
    pub gateway_order_id: String,
    /// Some backends return the publishable key with the order, others need a config call
    pub public_key: Option<Masked<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub provider: GatewayProvider,
    pub order_id: String,
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub provider_signature: Option<Masked<String>>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub payment_id: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub flow: FlowType,
    pub payment_id: String,
    /// Class id, membership package type or program id depending on `flow`
    pub target_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub confirmation_id: String,
    /// Id of the appointment, membership or enrollment that was created
    pub target_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub public_key: Masked<String>,
}

/// Exchange rates published by the backend, all relative to `base`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesSnapshot {
    pub base: String,
    pub rates: HashMap<String, Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// Backend endpoints the checkout pipeline consumes.
#[async_trait]
pub trait CheckoutBackend: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<CreatedOrder>;

    /// Backend is the only authority on whether a payment is valid
    async fn verify_order(&self, request: &VerifyRequest) -> CoreResult<VerifyResponse>;

    async fn finalize(&self, request: &FinalizeRequest) -> CoreResult<FinalizeResponse>;

    async fn gateway_config(&self, provider: GatewayProvider) -> CoreResult<GatewayConfig>;
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self) -> CoreResult<RatesSnapshot>;
}
