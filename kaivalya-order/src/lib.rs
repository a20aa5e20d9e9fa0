pub mod coordinator;
pub mod gateways;
pub mod manager;
pub mod models;
pub mod router;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use coordinator::{
    AbandonReason, CheckoutError, CheckoutOutcome, CheckoutRequest, CoordinatorSettings, InteractionResult,
    Interrupts, OrderLifecycleCoordinator,
};
pub use gateways::{DomesticGateway, InternationalGateway};
pub use manager::{OrderError, OrderManager};
pub use models::{BookingConfirmation, FinalizeTarget, Order, OrderStatus, PaymentResult};
pub use router::{route, GatewayRoute, PaymentGatewayRouter, RoutingDecision};
