use chrono::{DateTime, Utc};
use kaivalya_core::backend::FlowType;
use kaivalya_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manager::OrderError;
use crate::router::RoutingDecision;

/// Order status in the checkout lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    AwaitingGateway,
    Verifying,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled)
    }

    /// Edges of the lifecycle. Verification and finalization can only be cancelled
    /// by failing: once the payer has paid, the order must run to an outcome.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, AwaitingGateway)
                | (Created, Failed)
                | (Created, Cancelled)
                | (AwaitingGateway, Verifying)
                | (AwaitingGateway, Failed)
                | (AwaitingGateway, Cancelled)
                | (Verifying, Finalizing)
                | (Verifying, Failed)
                | (Finalizing, Completed)
                | (Finalizing, Failed)
        )
    }
}

/// The domain record a verified payment turns into
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalizeTarget {
    pub flow: FlowType,
    /// Class id, membership package type or program id
    pub target_id: String,
}

impl FinalizeTarget {
    pub fn booking(class_id: impl Into<String>) -> Self {
        Self { flow: FlowType::Booking, target_id: class_id.into() }
    }

    pub fn membership(package_type: impl Into<String>) -> Self {
        Self { flow: FlowType::Membership, target_id: package_type.into() }
    }

    pub fn enrollment(program_id: impl Into<String>) -> Self {
        Self { flow: FlowType::Enrollment, target_id: program_id.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_id: String,
    pub verified: bool,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingConfirmation {
    /// Assigned by the backend when the record was created
    pub confirmation_number: String,
    /// Appointment, membership or enrollment id
    pub target_reference: String,
    pub flow: FlowType,
    pub created_at: DateTime<Utc>,
}

/// One checkout attempt. A retry after failure is a new `Order` with a new id.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub draft_id: Uuid,
    /// Backend's order record, known once creation succeeded
    pub backend_order_id: Option<String>,
    pub gateway_order_id: Option<String>,
    /// Publishable key the provider UI is opened with
    #[serde(skip)]
    pub gateway_key: Option<Masked<String>>,
    /// Charged amount, in `currency`, rounded to its minor units
    pub amount: Decimal,
    pub currency: String,
    pub base_amount: Decimal,
    pub base_currency: String,
    pub exchange_rate: Decimal,
    pub description: String,
    /// Frozen when the order was opened
    pub route: RoutingDecision,
    pub target: FinalizeTarget,
    pub status: OrderStatus,
    pub payment: Option<PaymentResult>,
    /// Set when payment was captured but finalization failed
    pub needs_reconciliation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        draft_id: Uuid,
        amount: Decimal,
        currency: String,
        base_amount: Decimal,
        base_currency: String,
        exchange_rate: Decimal,
        description: String,
        route: RoutingDecision,
        target: FinalizeTarget,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            draft_id,
            backend_order_id: None,
            gateway_order_id: None,
            gateway_key: None,
            amount,
            currency,
            base_amount,
            base_currency,
            exchange_rate,
            description,
            route,
            target,
            status: OrderStatus::Created,
            payment: None,
            needs_reconciliation: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{GatewayRoute, RoutingDecision};
    use kaivalya_core::payment::GatewayProvider;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(
            Uuid::new_v4(),
            dec!(58.55),
            "USD".into(),
            dec!(89),
            "AUD".into(),
            dec!(0.6579),
            "Vinyasa Flow".into(),
            RoutingDecision {
                route: GatewayRoute::International,
                provider: GatewayProvider::PayPal,
                display_currency: "USD".into(),
                settlement_currency: "USD".into(),
                country_code: Some("US".into()),
            },
            FinalizeTarget::booking("class-1"),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = order();
        for next in [
            OrderStatus::AwaitingGateway,
            OrderStatus::Verifying,
            OrderStatus::Finalizing,
            OrderStatus::Completed,
        ] {
            order.transition(next).unwrap();
        }
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let mut order = order();

        // Cannot verify before the gateway reported
        assert!(order.transition(OrderStatus::Verifying).is_err());
        // Cannot finalize before verification
        assert!(order.transition(OrderStatus::Finalizing).is_err());
        assert_eq!(order.status, OrderStatus::Created);

        order.transition(OrderStatus::AwaitingGateway).unwrap();
        order.transition(OrderStatus::Verifying).unwrap();
        // A paid order is never cancelled
        assert!(order.transition(OrderStatus::Cancelled).is_err());

        order.transition(OrderStatus::Failed).unwrap();
        assert!(order.transition(OrderStatus::Finalizing).is_err());
    }
}
