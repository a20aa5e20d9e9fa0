use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct CurrencyChangedEvent {
    pub previous: String,
    pub current: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub draft_id: Uuid,
    pub gateway: String,
    pub gateway_order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderCompletedEvent {
    pub order_id: Uuid,
    pub payment_id: String,
    pub flow: String,
    pub confirmation_id: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderFailedEvent {
    pub order_id: Uuid,
    pub stage: String,
    pub reason: String,
    pub timestamp: i64,
}

/// Payment was captured but no booking/membership/enrollment record exists.
/// Needs an operator; never retried automatically.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReconciliationGapEvent {
    pub order_id: Uuid,
    pub payment_id: String,
    pub gateway_order_id: String,
    pub flow: String,
    pub target_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutEvent {
    OrderCreated(OrderCreatedEvent),
    OrderCompleted(OrderCompletedEvent),
    OrderFailed(OrderFailedEvent),
    ReconciliationGap(ReconciliationGapEvent),
}

impl CheckoutEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            CheckoutEvent::OrderCreated(e) => e.order_id,
            CheckoutEvent::OrderCompleted(e) => e.order_id,
            CheckoutEvent::OrderFailed(e) => e.order_id,
            CheckoutEvent::ReconciliationGap(e) => e.order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutEvent::OrderCreated(_) => "ORDER_CREATED",
            CheckoutEvent::OrderCompleted(_) => "ORDER_COMPLETED",
            CheckoutEvent::OrderFailed(_) => "ORDER_FAILED",
            CheckoutEvent::ReconciliationGap(_) => "RECONCILIATION_GAP",
        }
    }
}
