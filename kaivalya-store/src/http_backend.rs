use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kaivalya_core::backend::{
    CheckoutBackend, CreateOrderRequest, CreatedOrder, FinalizeRequest, FinalizeResponse, FlowType, GatewayConfig,
    RateSource, RatesSnapshot, VerifyRequest, VerifyResponse,
};
use kaivalya_core::payment::GatewayProvider;
use kaivalya_core::{CoreError, CoreResult};
use kaivalya_shared::Masked;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::app_config::BackendConfig;
use crate::error::StoreError;

/// The marketplace backend over HTTP
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<Masked<String>>,
    /// Stale rate responses omit `base`
    rates_base: String,
}

/// Ids come back as numbers from some endpoints and strings from others
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

/// Numeric ids go out as numbers, anything else as a string
fn wire_id(id: &str) -> Value {
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    description: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    base_amount_aud: Decimal,
    base_currency: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    exchange_rate: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    country_code: Option<&'a str>,
}

#[derive(Deserialize)]
struct RazorpayOrder {
    order_id: String,
    key_id: Option<String>,
}

#[derive(Deserialize)]
struct PayPalOrder {
    order_id: String,
    payment_id: WireId,
}

#[derive(Serialize)]
struct RazorpayVerifyBody<'a> {
    order_id: &'a str,
    razorpay_payment_id: &'a str,
    razorpay_signature: &'a str,
}

#[derive(Deserialize)]
struct PaymentStatus {
    status: String,
    payment_id: WireId,
}

#[derive(Deserialize)]
struct RazorpayKeys {
    key_id: String,
}

#[derive(Deserialize)]
struct PayPalKeys {
    client_id: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FinalizeReply {
    id: Option<WireId>,
    confirmation_number: Option<String>,
}

#[derive(Deserialize)]
struct RatesReply {
    base: Option<String>,
    rates: HashMap<String, Decimal>,
    updated_at: DateTime<Utc>,
    warning: Option<String>,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, rates_base: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.bearer_token.clone(),
            rates_base: rates_base.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        self.send(path, self.client.get(self.url(path))).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, StoreError> {
        self.send(path, self.client.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> Result<T, StoreError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorReply>(&body)
                .map(|reply| reply.error)
                .unwrap_or(body);
            warn!("{} returned {}: {}", path, status, message);
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|e| StoreError::Decode {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl CheckoutBackend for HttpBackend {
    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<CreatedOrder> {
        let body = CreateOrderBody {
            amount: request.amount,
            currency: &request.currency,
            description: &request.description,
            base_amount_aud: request.base_amount,
            base_currency: &request.base_currency,
            exchange_rate: request.exchange_rate,
            country_code: request.country_code.as_deref(),
        };

        let created = match request.provider {
            GatewayProvider::Razorpay => {
                let order: RazorpayOrder = self.post("/api/payments/razorpay/create", &body).await?;
                CreatedOrder {
                    order_id: order.order_id.clone(),
                    gateway_order_id: order.order_id,
                    public_key: order.key_id.map(Masked::new),
                }
            }
            GatewayProvider::PayPal => {
                let order: PayPalOrder = self.post("/api/payments/paypal/create", &body).await?;
                CreatedOrder {
                    order_id: order.payment_id.into(),
                    gateway_order_id: order.order_id,
                    public_key: None,
                }
            }
        };
        debug!("Backend created {} order {}", request.provider, created.gateway_order_id);
        Ok(created)
    }

    async fn verify_order(&self, request: &VerifyRequest) -> CoreResult<VerifyResponse> {
        let reply: PaymentStatus = match request.provider {
            GatewayProvider::Razorpay => {
                let signature = request.provider_signature.as_ref().ok_or_else(|| {
                    CoreError::ValidationError("domestic payment report carries no signature".into())
                })?;
                let body = RazorpayVerifyBody {
                    order_id: &request.provider_order_id,
                    razorpay_payment_id: &request.provider_payment_id,
                    razorpay_signature: signature.expose(),
                };
                self.post("/api/payments/razorpay/verify", &body).await?
            }
            GatewayProvider::PayPal => {
                let path = format!("/api/payments/paypal/capture/{}", request.provider_order_id);
                self.post(&path, &serde_json::json!({})).await?
            }
        };

        Ok(VerifyResponse {
            payment_id: reply.payment_id.into(),
            verified: reply.status.eq_ignore_ascii_case("success"),
        })
    }

    async fn finalize(&self, request: &FinalizeRequest) -> CoreResult<FinalizeResponse> {
        let (path, target_key) = match request.flow {
            FlowType::Booking => ("/api/bookings", "class_id"),
            FlowType::Membership => ("/api/memberships/purchase", "package_type"),
            FlowType::Enrollment => ("/api/programs/enroll", "program_id"),
        };
        let target = match request.flow {
            FlowType::Membership => Value::from(request.target_id.as_str()),
            _ => wire_id(&request.target_id),
        };
        let mut body = serde_json::Map::new();
        body.insert(target_key.to_string(), target);
        body.insert("payment_id".to_string(), wire_id(&request.payment_id));

        let reply: FinalizeReply = self.post(path, &body).await?;
        Ok(FinalizeResponse {
            confirmation_id: reply
                .confirmation_number
                .unwrap_or_else(|| format!("KV-{}", request.payment_id)),
            target_reference: reply
                .id
                .map(String::from)
                .unwrap_or_else(|| format!("{}-{}", request.flow, request.target_id)),
        })
    }

    async fn gateway_config(&self, provider: GatewayProvider) -> CoreResult<GatewayConfig> {
        let public_key = match provider {
            GatewayProvider::Razorpay => self.get::<RazorpayKeys>("/api/payments/config").await?.key_id,
            GatewayProvider::PayPal => self.get::<PayPalKeys>("/api/payments/paypal/config").await?.client_id,
        };
        Ok(GatewayConfig {
            public_key: Masked::new(public_key),
        })
    }
}

#[async_trait]
impl RateSource for HttpBackend {
    async fn fetch_rates(&self) -> CoreResult<RatesSnapshot> {
        let reply: RatesReply = self.get("/api/exchange-rates").await?;
        if let Some(warning) = &reply.warning {
            warn!("Exchange rate service: {}", warning);
        }
        Ok(RatesSnapshot {
            base: reply.base.unwrap_or_else(|| self.rates_base.clone()),
            rates: reply.rates,
            updated_at: reply.updated_at,
        })
    }
}
