use async_trait::async_trait;
use kaivalya_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::CoreResult;

/// Payment providers the marketplace integrates with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Razorpay,
    PayPal,
}

impl GatewayProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayProvider::Razorpay => "razorpay",
            GatewayProvider::PayPal => "paypal",
        }
    }
}

impl std::fmt::Display for GatewayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the coordinator asks an adapter to register with its provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrderRequest {
    /// Amount in the settlement currency, already rounded to minor units
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    /// Canonical catalog price the charge was derived from
    pub base_amount: Decimal,
    pub base_currency: String,
    pub exchange_rate: Decimal,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrder {
    /// Backend's identifier for the order record
    pub order_id: String,
    pub provider_order_id: String,
    pub public_key: Masked<String>,
}

/// Options handed to the provider UI when the payer is asked to pay.
#[derive(Debug, Clone)]
pub struct GatewayCheckout {
    pub key: Masked<String>,
    pub amount: Decimal,
    pub currency: String,
    /// Decimal places of `currency` (0 for JPY and KRW)
    pub minor_units: u32,
    pub provider_order_id: String,
    pub description: String,
    pub merchant_name: String,
}

/// Raw success report from a provider, forwarded untouched to backend verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub provider_signature: Option<Masked<String>>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Success(GatewayPayload),
    Cancelled,
    Failed(String),
}

/// Callback surface given to a provider UI.
///
/// Reports travel over a channel owned by one interaction. Once the coordinator has
/// taken the first report, or the checkout session went away, the receiver is gone
/// and any further report is silently dropped.
#[derive(Debug, Clone)]
pub struct GatewayCallbacks {
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl GatewayCallbacks {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on_success(&self, payload: GatewayPayload) {
        self.report(GatewayEvent::Success(payload));
    }

    pub fn on_cancel(&self) {
        self.report(GatewayEvent::Cancelled);
    }

    pub fn on_error(&self, err: impl Into<String>) {
        self.report(GatewayEvent::Failed(err.into()));
    }

    /// True once nobody is listening any more.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    fn report(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Dropping gateway report: interaction already settled");
        }
    }
}

/// Uniform wrapper around one payment provider's SDK.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn provider(&self) -> GatewayProvider;

    /// Currency the provider will actually charge for a payer viewing `display_currency`.
    fn settlement_currency(&self, display_currency: &str) -> String;

    /// Register the order with the provider (through the backend)
    async fn create_remote_order(&self, request: &RemoteOrderRequest) -> CoreResult<RemoteOrder>;

    /// Hand control to the provider UI. Returns once the UI is showing; the outcome
    /// arrives later through `callbacks`.
    async fn open(&self, checkout: GatewayCheckout, callbacks: GatewayCallbacks) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> GatewayPayload {
        GatewayPayload {
            provider_order_id: "order_1".into(),
            provider_payment_id: "pay_1".into(),
            provider_signature: None,
            raw: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_first_report_is_delivered() {
        let (callbacks, mut rx) = GatewayCallbacks::channel();
        callbacks.on_success(payload());
        callbacks.on_cancel();

        assert!(matches!(rx.recv().await, Some(GatewayEvent::Success(_))));
        assert!(matches!(rx.recv().await, Some(GatewayEvent::Cancelled)));
    }

    #[test]
    fn test_reports_after_receiver_dropped_are_inert() {
        let (callbacks, rx) = GatewayCallbacks::channel();
        drop(rx);

        assert!(callbacks.is_detached());
        callbacks.on_success(payload());
        callbacks.on_error("late");
    }

    #[test]
    fn test_provider_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&GatewayProvider::PayPal).unwrap(), "\"paypal\"");
        assert_eq!(GatewayProvider::Razorpay.to_string(), "razorpay");
    }
}
