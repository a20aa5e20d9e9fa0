use async_trait::async_trait;
use kaivalya_shared::models::events::CheckoutEvent;
use tracing::{error, info};

use crate::CoreResult;

/// Destination for order lifecycle events. Reconciliation gaps must reach an operator,
/// so sinks should persist them somewhere outside the UI.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &CheckoutEvent) -> CoreResult<()>;
}

/// Writes events to the tracing pipeline only.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: &CheckoutEvent) -> CoreResult<()> {
        match event {
            CheckoutEvent::ReconciliationGap(gap) => {
                error!(
                    order_id = %gap.order_id,
                    payment_id = %gap.payment_id,
                    flow = %gap.flow,
                    "RECONCILIATION GAP: payment captured without a domain record"
                );
            }
            other => {
                info!(order_id = %other.order_id(), kind = other.kind(), "Checkout event");
            }
        }
        Ok(())
    }
}
