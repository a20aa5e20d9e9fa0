use chrono::Utc;
use kaivalya_catalog::{CurrencyConversionService, CurrencyError};
use kaivalya_core::backend::{CheckoutBackend, FinalizeRequest, VerifyRequest};
use kaivalya_core::events::EventSink;
use kaivalya_core::payment::{GatewayCallbacks, GatewayCheckout, GatewayEvent, GatewayPayload, RemoteOrderRequest};
use kaivalya_core::{with_timeout, CoreError};
use kaivalya_shared::models::events::{
    CheckoutEvent, CurrencyChangedEvent, OrderCompletedEvent, OrderCreatedEvent, OrderFailedEvent,
    ReconciliationGapEvent,
};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::manager::{OrderError, OrderManager};
use crate::models::{BookingConfirmation, FinalizeTarget, Order, OrderStatus, PaymentResult};
use crate::router::PaymentGatewayRouter;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Upper bound for each create, verify and finalize round trip
    pub request_timeout: Duration,
    /// Shown in the provider UI
    pub merchant_name: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            merchant_name: "Kaivalya".to_string(),
        }
    }
}

/// What the wizard hands over at its payment step
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub draft_id: Uuid,
    /// Total in the base currency
    pub base_amount: Decimal,
    pub display_currency: String,
    pub country_code: Option<String>,
    pub description: String,
    pub target: FinalizeTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    SessionClosed,
    CurrencyChanged,
}

#[derive(Debug)]
pub enum InteractionResult {
    Paid(GatewayPayload),
    Cancelled,
    Failed(String),
    Abandoned(AbandonReason),
}

#[derive(Debug)]
pub enum CheckoutOutcome {
    Completed(BookingConfirmation),
    /// The order is gone; the payer may try again with a new one
    Failed(CheckoutError),
    Cancelled,
    Abandoned(AbandonReason),
    /// Payment captured, no record created. The order is kept for an operator.
    ReconciliationGap { order_id: Uuid, payment_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("A checkout is already running for draft {0}")]
    InFlight(Uuid),

    #[error(transparent)]
    Currency(#[from] CurrencyError),

    #[error("Could not create the order: {0}")]
    Create(CoreError),

    #[error("Order {0} was never registered with the backend")]
    Unregistered(Uuid),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Payment verification failed: {0}")]
    Verify(CoreError),

    #[error("Payment {payment_id} was not verified")]
    NotVerified { payment_id: String },

    #[error("Payment {payment_id} for order {order_id} was captured but nothing was created")]
    ReconciliationGap { order_id: Uuid, payment_id: String },

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl CheckoutError {
    /// Whether starting over with a new order is safe. Never true once the payer
    /// may have been charged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::Create(_) | CheckoutError::Gateway(_))
    }

    /// The gateway reported a payment the backend did not confirm. The charge may
    /// still have gone through.
    pub fn is_unconfirmed_payment(&self) -> bool {
        matches!(self, CheckoutError::Verify(_) | CheckoutError::NotVerified { .. })
    }

    pub fn is_network(&self) -> bool {
        match self {
            CheckoutError::Create(e) | CheckoutError::Verify(e) => e.is_network(),
            _ => false,
        }
    }
}

/// Session close and display-currency changes, the two things that end a
/// checkout before the payer has paid.
pub struct Interrupts {
    closed: watch::Receiver<bool>,
    currency: broadcast::Receiver<CurrencyChangedEvent>,
}

impl Interrupts {
    pub fn new(closed: watch::Receiver<bool>, currency: broadcast::Receiver<CurrencyChangedEvent>) -> Self {
        Self { closed, currency }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    pub async fn wait(&mut self) -> AbandonReason {
        tokio::select! {
            _ = wait_closed(&mut self.closed) => AbandonReason::SessionClosed,
            _ = wait_currency_change(&mut self.currency) => AbandonReason::CurrencyChanged,
        }
    }
}

// Resolves on close, or when the session owner is gone
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn wait_currency_change(changes: &mut broadcast::Receiver<CurrencyChangedEvent>) {
    loop {
        match changes.recv().await {
            Ok(event) if event.previous != event.current => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held while a draft has a checkout running
struct DraftClaim<'a> {
    drafts: &'a Mutex<HashSet<Uuid>>,
    draft_id: Uuid,
}

impl Drop for DraftClaim<'_> {
    fn drop(&mut self) {
        lock(self.drafts).remove(&self.draft_id);
    }
}

/// Drives one order from creation through gateway interaction, verification and
/// finalization.
pub struct OrderLifecycleCoordinator {
    backend: Arc<dyn CheckoutBackend>,
    router: PaymentGatewayRouter,
    currency: Arc<CurrencyConversionService>,
    events: Arc<dyn EventSink>,
    settings: CoordinatorSettings,
    orders: Mutex<OrderManager>,
    drafts_in_flight: Mutex<HashSet<Uuid>>,
}

impl OrderLifecycleCoordinator {
    pub fn new(
        backend: Arc<dyn CheckoutBackend>,
        router: PaymentGatewayRouter,
        currency: Arc<CurrencyConversionService>,
        events: Arc<dyn EventSink>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            backend,
            router,
            currency,
            events,
            settings,
            orders: Mutex::new(OrderManager::new()),
            drafts_in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn currency(&self) -> &Arc<CurrencyConversionService> {
        &self.currency
    }

    pub fn order(&self, order_id: &Uuid) -> Option<Order> {
        lock(&self.orders).get(order_id).cloned()
    }

    /// Orders whose payment was captured without a record being created
    pub fn reconciliation_queue(&self) -> Vec<Order> {
        lock(&self.orders).reconciliation_queue()
    }

    pub fn interrupts(&self, closed: watch::Receiver<bool>) -> Interrupts {
        Interrupts::new(closed, self.currency.subscribe())
    }

    /// Run the whole checkout for one draft.
    ///
    /// `Err` when the checkout never started (another run holds the draft, or the
    /// amount could not be priced) or the order bookkeeping refused a step. Anything
    /// the payer, the provider or the backend did is a `CheckoutOutcome`.
    pub async fn run(
        &self,
        request: CheckoutRequest,
        closed: watch::Receiver<bool>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let _claim = self.claim(request.draft_id)?;
        let mut interrupts = self.interrupts(closed);
        if interrupts.is_closed() {
            return Ok(CheckoutOutcome::Abandoned(AbandonReason::SessionClosed));
        }

        let opened = self.open_order(&request)?;
        let order_id = opened.id;
        tokio::select! {
            biased;
            created = self.register_order(opened) => {
                if let Err(e) = created {
                    return Ok(CheckoutOutcome::Failed(e));
                }
            }
            reason = interrupts.wait() => {
                self.cancel(order_id, reason);
                return Ok(CheckoutOutcome::Abandoned(reason));
            }
        }

        let payload = match self.present_gateway_interaction(order_id, &mut interrupts).await? {
            InteractionResult::Paid(payload) => payload,
            InteractionResult::Cancelled => return Ok(CheckoutOutcome::Cancelled),
            InteractionResult::Failed(reason) => return Ok(CheckoutOutcome::Failed(CheckoutError::Gateway(reason))),
            InteractionResult::Abandoned(reason) => return Ok(CheckoutOutcome::Abandoned(reason)),
        };

        // The payer has paid: closing the session or switching currency no longer
        // stops the run
        drop(interrupts);

        if let Err(e) = self.verify_and_capture(order_id, payload).await {
            return Ok(CheckoutOutcome::Failed(e));
        }

        match self.finalize(order_id).await {
            Ok(confirmation) => Ok(CheckoutOutcome::Completed(confirmation)),
            Err(CheckoutError::ReconciliationGap { order_id, payment_id }) => {
                Ok(CheckoutOutcome::ReconciliationGap { order_id, payment_id })
            }
            Err(e) => Ok(CheckoutOutcome::Failed(e)),
        }
    }

    /// Open an order and register it with the backend. A second call for the same
    /// draft while one is outstanding is rejected without touching the network.
    pub async fn create_order(&self, request: &CheckoutRequest) -> Result<Order, CheckoutError> {
        let _claim = self.claim(request.draft_id)?;
        let order = self.open_order(request)?;
        self.register_order(order).await
    }

    /// Hand a registered order to the routed provider UI and wait for its first report.
    /// The callback channel is dropped on return, so late or repeated reports are inert.
    pub async fn present_gateway_interaction(
        &self,
        order_id: Uuid,
        interrupts: &mut Interrupts,
    ) -> Result<InteractionResult, CheckoutError> {
        let order = self.order(&order_id).ok_or(OrderError::NotFound(order_id))?;
        let (Some(provider_order_id), Some(key)) = (order.gateway_order_id.clone(), order.gateway_key.clone())
        else {
            return Err(CheckoutError::Unregistered(order_id));
        };
        let minor_units = self
            .currency
            .registry()
            .get(&order.currency)
            .map(|c| c.minor_units)
            .ok_or_else(|| CurrencyError::UnknownCurrency(order.currency.clone()))?;
        lock(&self.orders).transition(&order_id, OrderStatus::AwaitingGateway)?;

        let adapter = self.router.adapter(order.route.route);
        let (callbacks, mut reports) = GatewayCallbacks::channel();
        let checkout = GatewayCheckout {
            key,
            amount: order.amount,
            currency: order.currency.clone(),
            minor_units,
            provider_order_id,
            description: order.description.clone(),
            merchant_name: self.settings.merchant_name.clone(),
        };
        info!(%order_id, provider = %order.route.provider, "Opening payment gateway");

        let result = tokio::select! {
            biased;
            report = async {
                adapter.open(checkout, callbacks).await.map_err(|e| e.to_string())?;
                let event = reports
                    .recv()
                    .await
                    .ok_or_else(|| "gateway closed without reporting".to_string())?;
                Ok::<_, String>(event)
            } => match report {
                Ok(GatewayEvent::Success(payload)) => InteractionResult::Paid(payload),
                Ok(GatewayEvent::Cancelled) => InteractionResult::Cancelled,
                Ok(GatewayEvent::Failed(reason)) | Err(reason) => InteractionResult::Failed(reason),
            },
            reason = interrupts.wait() => InteractionResult::Abandoned(reason),
        };
        drop(reports);

        match &result {
            InteractionResult::Paid(payload) => {
                info!(%order_id, provider_payment_id = %payload.provider_payment_id, "Gateway reported payment");
            }
            InteractionResult::Cancelled => {
                info!(%order_id, "Payer cancelled at the gateway");
                self.close_order(order_id, OrderStatus::Cancelled);
            }
            InteractionResult::Failed(reason) => {
                warn!(%order_id, "Gateway reported an error: {}", reason);
                self.fail(order_id, "gateway", reason).await;
            }
            InteractionResult::Abandoned(reason) => self.cancel(order_id, *reason),
        }
        Ok(result)
    }

    /// Ask the backend whether the reported payment is real. Runs once; a failure is
    /// final because the charge may already have gone through.
    pub async fn verify_and_capture(&self, order_id: Uuid, payload: GatewayPayload) -> Result<PaymentResult, CheckoutError> {
        let order = lock(&self.orders).transition(&order_id, OrderStatus::Verifying)?;
        let Some(backend_order_id) = order.backend_order_id.clone() else {
            self.fail(order_id, "verify", "order was never registered").await;
            return Err(CheckoutError::Unregistered(order_id));
        };

        let GatewayPayload {
            provider_order_id,
            provider_payment_id,
            provider_signature,
            raw,
        } = payload;
        let request = VerifyRequest {
            provider: order.route.provider,
            order_id: backend_order_id,
            provider_order_id,
            provider_payment_id,
            provider_signature,
            raw: raw.clone(),
        };

        match with_timeout(self.settings.request_timeout, self.backend.verify_order(&request)).await {
            Ok(response) if response.verified => {
                let payment = PaymentResult {
                    payment_id: response.payment_id,
                    verified: true,
                    raw,
                };
                lock(&self.orders).get_mut(&order_id)?.payment = Some(payment.clone());
                info!(%order_id, payment_id = %payment.payment_id, "Payment verified");
                Ok(payment)
            }
            Ok(response) => {
                warn!(%order_id, payment_id = %response.payment_id, "Backend refused the payment");
                self.fail(order_id, "verify", "payment not verified").await;
                Err(CheckoutError::NotVerified {
                    payment_id: response.payment_id,
                })
            }
            Err(e) => {
                warn!(%order_id, "Verification failed, not retrying: {}", e);
                self.fail(order_id, "verify", &e.to_string()).await;
                Err(CheckoutError::Verify(e))
            }
        }
    }

    /// Create the booking, membership or enrollment for a verified payment. Called
    /// at most once per order: a failed order cannot reach `Finalizing` again.
    pub async fn finalize(&self, order_id: Uuid) -> Result<BookingConfirmation, CheckoutError> {
        let (order, payment) = {
            let mut orders = lock(&self.orders);
            let order = orders.get_mut(&order_id)?;
            let payment = match order.payment.clone() {
                Some(payment) if payment.verified && order.status == OrderStatus::Verifying => payment,
                _ => {
                    return Err(OrderError::InvalidTransition {
                        order_id,
                        from: order.status,
                        to: OrderStatus::Finalizing,
                    }
                    .into())
                }
            };
            order.transition(OrderStatus::Finalizing)?;
            (order.clone(), payment)
        };

        let request = FinalizeRequest {
            flow: order.target.flow,
            payment_id: payment.payment_id.clone(),
            target_id: order.target.target_id.clone(),
        };

        match with_timeout(self.settings.request_timeout, self.backend.finalize(&request)).await {
            Ok(response) => {
                self.close_order(order_id, OrderStatus::Completed);
                info!(%order_id, confirmation = %response.confirmation_id, flow = %order.target.flow, "Checkout completed");
                self.publish(CheckoutEvent::OrderCompleted(OrderCompletedEvent {
                    order_id,
                    payment_id: payment.payment_id,
                    flow: order.target.flow.to_string(),
                    confirmation_id: response.confirmation_id.clone(),
                    timestamp: Utc::now().timestamp(),
                }))
                .await;

                Ok(BookingConfirmation {
                    confirmation_number: response.confirmation_id,
                    target_reference: response.target_reference,
                    flow: order.target.flow,
                    created_at: Utc::now(),
                })
            }
            Err(e) => {
                {
                    let mut orders = lock(&self.orders);
                    let order = orders.get_mut(&order_id)?;
                    order.needs_reconciliation = true;
                    if let Err(err) = order.transition(OrderStatus::Failed) {
                        warn!(%order_id, "Could not mark order failed: {}", err);
                    }
                }
                error!(
                    %order_id,
                    payment_id = %payment.payment_id,
                    flow = %order.target.flow,
                    target_id = %order.target.target_id,
                    "Payment captured but finalize failed: {}",
                    e
                );
                self.publish(CheckoutEvent::ReconciliationGap(ReconciliationGapEvent {
                    order_id,
                    payment_id: payment.payment_id.clone(),
                    gateway_order_id: order.gateway_order_id.clone().unwrap_or_default(),
                    flow: order.target.flow.to_string(),
                    target_id: order.target.target_id.clone(),
                    amount: order.amount,
                    currency: order.currency.clone(),
                    reason: e.to_string(),
                    timestamp: Utc::now().timestamp(),
                }))
                .await;

                Err(CheckoutError::ReconciliationGap {
                    order_id,
                    payment_id: payment.payment_id,
                })
            }
        }
    }

    fn claim(&self, draft_id: Uuid) -> Result<DraftClaim<'_>, CheckoutError> {
        let mut drafts = lock(&self.drafts_in_flight);
        if !drafts.insert(draft_id) {
            warn!(%draft_id, "Ignoring checkout request: one is already in flight");
            return Err(CheckoutError::InFlight(draft_id));
        }
        Ok(DraftClaim {
            drafts: &self.drafts_in_flight,
            draft_id,
        })
    }

    /// Route, price and record a new order. Routing is frozen here.
    fn open_order(&self, request: &CheckoutRequest) -> Result<Order, CheckoutError> {
        let route = self
            .router
            .decide(&request.display_currency, request.country_code.as_deref());
        let quote = self.currency.charge_quote(request.base_amount, &route.settlement_currency)?;

        let order = Order::new(
            request.draft_id,
            quote.amount,
            quote.currency,
            request.base_amount,
            self.currency.base_code().to_string(),
            quote.exchange_rate,
            request.description.clone(),
            route,
            request.target.clone(),
        );
        lock(&self.orders).insert(order.clone())?;

        info!(
            order_id = %order.id,
            draft_id = %order.draft_id,
            provider = %order.route.provider,
            amount = %order.amount,
            currency = %order.currency,
            "Order opened"
        );
        Ok(order)
    }

    async fn register_order(&self, order: Order) -> Result<Order, CheckoutError> {
        let adapter = self.router.adapter(order.route.route);
        let request = RemoteOrderRequest {
            amount: order.amount,
            currency: order.currency.clone(),
            description: order.description.clone(),
            base_amount: order.base_amount,
            base_currency: order.base_currency.clone(),
            exchange_rate: order.exchange_rate,
            country_code: order.route.country_code.clone(),
        };

        let remote = match with_timeout(self.settings.request_timeout, adapter.create_remote_order(&request)).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(order_id = %order.id, "Order creation failed: {}", e);
                self.fail(order.id, "create", &e.to_string()).await;
                return Err(CheckoutError::Create(e));
            }
        };

        let order = {
            let mut orders = lock(&self.orders);
            let order = orders.get_mut(&order.id)?;
            order.backend_order_id = Some(remote.order_id);
            order.gateway_order_id = Some(remote.provider_order_id.clone());
            order.gateway_key = Some(remote.public_key);
            order.updated_at = Utc::now();
            order.clone()
        };

        self.publish(CheckoutEvent::OrderCreated(OrderCreatedEvent {
            order_id: order.id,
            draft_id: order.draft_id,
            gateway: order.route.provider.to_string(),
            gateway_order_id: remote.provider_order_id,
            amount: order.amount,
            currency: order.currency.clone(),
            timestamp: Utc::now().timestamp(),
        }))
        .await;
        Ok(order)
    }

    fn cancel(&self, order_id: Uuid, reason: AbandonReason) {
        info!(%order_id, ?reason, "Abandoning order");
        self.close_order(order_id, OrderStatus::Cancelled);
    }

    async fn fail(&self, order_id: Uuid, stage: &str, reason: &str) {
        self.close_order(order_id, OrderStatus::Failed);
        self.publish(CheckoutEvent::OrderFailed(OrderFailedEvent {
            order_id,
            stage: stage.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now().timestamp(),
        }))
        .await;
    }

    /// Move to a terminal status and drop the order
    fn close_order(&self, order_id: Uuid, status: OrderStatus) {
        let mut orders = lock(&self.orders);
        if let Err(e) = orders.transition(&order_id, status) {
            warn!(%order_id, "Could not close order as {:?}: {}", status, e);
        }
        orders.discard(&order_id);
    }

    async fn publish(&self, event: CheckoutEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(order_id = %event.order_id(), kind = event.kind(), "Failed to publish checkout event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::GatewayRoute;
    use crate::testing::{CheckoutRig, ScriptedBackend, SdkScript, DOMESTIC_KEY, INTERNATIONAL_CLIENT_ID};
    use kaivalya_core::backend::FlowType;
    use kaivalya_core::payment::GatewayProvider;
    use rust_decimal_macros::dec;

    fn request(currency: &str, country: Option<&str>, target: FinalizeTarget, base_amount: Decimal) -> CheckoutRequest {
        CheckoutRequest {
            draft_id: Uuid::new_v4(),
            base_amount,
            display_currency: currency.to_string(),
            country_code: country.map(str::to_string),
            description: "Vinyasa Flow with Asha".to_string(),
            target,
        }
    }

    fn booking() -> CheckoutRequest {
        request("USD", Some("US"), FinalizeTarget::booking("class-42"), dec!(89))
    }

    fn session() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_concurrent_create_issues_one_call() {
        let rig = CheckoutRig::new(ScriptedBackend::new().with_create_delay(Duration::from_millis(50)));
        let req = booking();

        let (first, second) = tokio::join!(rig.coordinator.create_order(&req), rig.coordinator.create_order(&req));
        let first = first.unwrap();
        assert!(matches!(second, Err(CheckoutError::InFlight(id)) if id == req.draft_id));
        assert_eq!(rig.backend.create_calls(), 1);

        // Claim is released once the first call returned
        let third = rig.coordinator.create_order(&req).await.unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(rig.backend.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_international_booking_completes() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let (_session, closed) = session();

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        let confirmation = match outcome {
            CheckoutOutcome::Completed(confirmation) => confirmation,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(confirmation.confirmation_number, "KV-00001");
        assert_eq!(confirmation.target_reference, "booking-class-42");
        assert_eq!(confirmation.flow, FlowType::Booking);

        let created = rig.backend.created();
        assert_eq!(created[0].provider, GatewayProvider::PayPal);
        assert_eq!(created[0].amount, dec!(58.55));
        assert_eq!(created[0].currency, "USD");
        assert_eq!(created[0].base_amount, dec!(89));
        assert_eq!(created[0].base_currency, "AUD");
        assert_eq!(created[0].country_code.as_deref(), Some("US"));

        let opened = rig.international.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].amount, "58.55");
        assert_eq!(opened[0].key, INTERNATIONAL_CLIENT_ID);
        assert_eq!(rig.backend.config_calls(), 1);
        assert!(rig.domestic.opened().is_empty());

        let finalized = rig.backend.finalized();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].payment_id, "pay_1");
        assert_eq!(rig.events.kinds(), vec!["ORDER_CREATED", "ORDER_COMPLETED"]);
    }

    #[tokio::test]
    async fn test_rupee_checkout_goes_domestic() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let (_session, closed) = session();

        let req = request("INR", None, FinalizeTarget::enrollment("meditation"), dec!(89));
        let outcome = rig.coordinator.run(req, closed).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Completed(ref c) if c.flow == FlowType::Enrollment));

        let opened = rig.domestic.opened();
        assert_eq!(opened[0].currency, "INR");
        assert_eq!(opened[0].amount, "488914");
        assert_eq!(opened[0].key, DOMESTIC_KEY);
        assert_eq!(rig.backend.config_calls(), 0);
        assert!(rig.backend.verified()[0].provider_signature.is_some());
        assert_eq!(rig.backend.finalized()[0].flow, FlowType::Enrollment);
        assert_eq!(rig.backend.finalized()[0].target_id, "meditation");
    }

    #[tokio::test]
    async fn test_payer_in_india_is_charged_rupees() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let req = request("USD", Some("IN"), FinalizeTarget::membership("monthly"), dec!(99));

        let order = rig.coordinator.create_order(&req).await.unwrap();
        assert_eq!(order.route.route, GatewayRoute::Domestic);
        assert_eq!(order.route.display_currency, "USD");
        assert_eq!(order.currency, "INR");
        assert_eq!(order.amount, dec!(5438.49));
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[tokio::test]
    async fn test_unsupported_currency_settles_in_usd() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let req = request("BRL", Some("BR"), FinalizeTarget::membership("quarterly"), dec!(249));

        let order = rig.coordinator.create_order(&req).await.unwrap();
        assert_eq!(order.route.provider, GatewayProvider::PayPal);
        assert_eq!(order.currency, "USD");
        assert_eq!(order.amount, dec!(163.82));
        assert_eq!(rig.backend.created()[0].currency, "USD");
    }

    #[tokio::test]
    async fn test_finalize_failure_is_a_reconciliation_gap() {
        let rig = CheckoutRig::new(ScriptedBackend::new().fail_finalize(CoreError::Rejected {
            status: 500,
            message: "membership insert failed".into(),
        }));
        let (_session, closed) = session();

        let req = request("USD", Some("US"), FinalizeTarget::membership("quarterly"), dec!(249));
        let outcome = rig.coordinator.run(req, closed).await.unwrap();
        let (order_id, payment_id) = match outcome {
            CheckoutOutcome::ReconciliationGap { order_id, payment_id } => (order_id, payment_id),
            other => panic!("expected a reconciliation gap, got {:?}", other),
        };
        assert_eq!(payment_id, "pay_1");
        assert_eq!(rig.backend.finalize_calls(), 1);

        let queue = rig.coordinator.reconciliation_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, order_id);
        assert_eq!(queue[0].status, OrderStatus::Failed);
        assert!(queue[0].needs_reconciliation);
        assert!(queue[0].payment.is_some());
        assert_eq!(rig.events.kinds(), vec!["ORDER_CREATED", "RECONCILIATION_GAP"]);

        // No second finalize for the same order
        let again = rig.coordinator.finalize(order_id).await;
        assert!(matches!(again, Err(CheckoutError::Order(OrderError::InvalidTransition { .. }))));
        assert_eq!(rig.backend.finalize_calls(), 1);
    }

    #[tokio::test]
    async fn test_verify_failure_is_not_retried() {
        let rig = CheckoutRig::new(ScriptedBackend::new().fail_verify(CoreError::Timeout(Duration::from_secs(2))));
        let (_session, closed) = session();

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        match &outcome {
            CheckoutOutcome::Failed(e @ CheckoutError::Verify(CoreError::Timeout(_))) => {
                assert!(!e.is_retryable());
                assert!(e.is_network());
                assert!(e.is_unconfirmed_payment());
            }
            other => panic!("expected a verify failure, got {:?}", other),
        }
        assert_eq!(rig.backend.verify_calls(), 1);
        assert_eq!(rig.backend.finalize_calls(), 0);
        assert!(rig.coordinator.reconciliation_queue().is_empty());
        assert_eq!(rig.events.kinds(), vec!["ORDER_CREATED", "ORDER_FAILED"]);
    }

    #[tokio::test]
    async fn test_unverified_payment_is_not_finalized() {
        let rig = CheckoutRig::new(ScriptedBackend::new().reject_payments());
        let (_session, closed) = session();

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Failed(CheckoutError::NotVerified { .. })));
        assert_eq!(rig.backend.finalize_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_then_retry_uses_a_new_order() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        rig.international.set_script(SdkScript::Cancel);
        let req = booking();
        let (_session, closed) = session();

        let first = rig.coordinator.run(req.clone(), closed.clone()).await.unwrap();
        assert!(matches!(first, CheckoutOutcome::Cancelled));
        assert_eq!(rig.backend.verify_calls(), 0);

        rig.international.set_script(SdkScript::Pay);
        let second = rig.coordinator.run(req, closed).await.unwrap();
        assert!(matches!(second, CheckoutOutcome::Completed(_)));

        let created: Vec<Uuid> = rig
            .events
            .events()
            .iter()
            .filter_map(|e| match e {
                CheckoutEvent::OrderCreated(created) => Some(created.order_id),
                _ => None,
            })
            .collect();
        assert_eq!(created.len(), 2);
        assert_ne!(created[0], created[1]);
        assert_eq!(rig.backend.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_slow_create_times_out_and_can_be_retried() {
        let rig = CheckoutRig::with_request_timeout(
            ScriptedBackend::new().with_create_delay(Duration::from_millis(500)),
            Duration::from_millis(50),
        );
        let (_session, closed) = session();

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        match &outcome {
            CheckoutOutcome::Failed(e @ CheckoutError::Create(CoreError::Timeout(limit))) => {
                assert_eq!(*limit, Duration::from_millis(50));
                assert!(e.is_retryable());
                assert!(e.is_network());
            }
            other => panic!("expected a create timeout, got {:?}", other),
        }
        assert_eq!(rig.backend.create_calls(), 1);
        assert!(rig.international.opened().is_empty());
        assert_eq!(rig.backend.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_finalize_is_a_reconciliation_gap() {
        let rig = CheckoutRig::with_request_timeout(
            ScriptedBackend::new().with_finalize_delay(Duration::from_millis(500)),
            Duration::from_millis(50),
        );
        let (_session, closed) = session();

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        let order_id = match outcome {
            CheckoutOutcome::ReconciliationGap { order_id, .. } => order_id,
            other => panic!("expected a reconciliation gap, got {:?}", other),
        };
        assert_eq!(rig.backend.finalize_calls(), 1);

        let queue = rig.coordinator.reconciliation_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, order_id);
        assert!(queue[0].needs_reconciliation);
        assert_eq!(rig.events.kinds().last(), Some(&"RECONCILIATION_GAP"));
    }

    #[tokio::test]
    async fn test_create_failure_allows_retry() {
        let rig = CheckoutRig::new(ScriptedBackend::new().fail_create(CoreError::NetworkError("connection reset".into())));
        let req = booking();
        let (_session, closed) = session();

        let first = rig.coordinator.run(req.clone(), closed.clone()).await.unwrap();
        match &first {
            CheckoutOutcome::Failed(e) => {
                assert!(e.is_retryable());
                assert!(e.is_network());
            }
            other => panic!("expected a create failure, got {:?}", other),
        }
        assert!(rig.international.opened().is_empty());

        let second = rig.coordinator.run(req, closed).await.unwrap();
        assert!(matches!(second, CheckoutOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_gateway_errors_return_to_review() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let (_session, closed) = session();

        rig.international.set_script(SdkScript::Fail("card declined".into()));
        let outcome = rig.coordinator.run(booking(), closed.clone()).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Failed(CheckoutError::Gateway(ref r)) if r == "card declined"));

        rig.international.set_script(SdkScript::FailToOpen("script blocked".into()));
        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Failed(CheckoutError::Gateway(_))));
        assert_eq!(rig.backend.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_success_reports_verify_once() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        rig.international.set_script(SdkScript::PayTwice);
        let (_session, closed) = session();

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Completed(_)));
        assert_eq!(rig.backend.verify_calls(), 1);
        assert_eq!(rig.backend.finalize_calls(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_makes_late_reports_inert() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        rig.international.set_script(SdkScript::Hold);
        let (session, closed) = session();

        let coordinator = rig.coordinator.clone();
        let req = booking();
        let run = tokio::spawn(async move { coordinator.run(req, closed).await });

        while rig.international.opened().is_empty() {
            tokio::task::yield_now().await;
        }
        session.send(true).unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Abandoned(AbandonReason::SessionClosed)));

        assert_eq!(rig.international.fire_late_success(), 0);
        tokio::task::yield_now().await;
        assert_eq!(rig.backend.verify_calls(), 0);
        assert!(rig.coordinator.reconciliation_queue().is_empty());
    }

    #[tokio::test]
    async fn test_currency_change_abandons_active_order() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        rig.international.set_script(SdkScript::Hold);
        let (_session, closed) = session();

        let coordinator = rig.coordinator.clone();
        let req = booking();
        let run = tokio::spawn(async move { coordinator.run(req, closed).await });

        while rig.international.opened().is_empty() {
            tokio::task::yield_now().await;
        }
        rig.currency.select("EUR").unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Abandoned(AbandonReason::CurrencyChanged)));
        assert_eq!(rig.events.kinds(), vec!["ORDER_CREATED"]);
        assert_eq!(rig.backend.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_closed_before_start_creates_nothing() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let (session, closed) = session();
        drop(session);

        let outcome = rig.coordinator.run(booking(), closed).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Abandoned(AbandonReason::SessionClosed)));
        assert_eq!(rig.backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_steps_cannot_run_out_of_order() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let order = rig.coordinator.create_order(&booking()).await.unwrap();

        let forged = GatewayPayload {
            provider_order_id: "PAYPAL-1".into(),
            provider_payment_id: "forged".into(),
            provider_signature: None,
            raw: serde_json::json!({}),
        };
        let verify = rig.coordinator.verify_and_capture(order.id, forged).await;
        assert!(matches!(verify, Err(CheckoutError::Order(OrderError::InvalidTransition { .. }))));
        assert_eq!(rig.backend.verify_calls(), 0);

        let finalize = rig.coordinator.finalize(order.id).await;
        assert!(matches!(finalize, Err(CheckoutError::Order(_))));
        assert_eq!(rig.backend.finalize_calls(), 0);
        assert_eq!(rig.coordinator.order(&order.id).unwrap().status, OrderStatus::Created);
    }

    #[tokio::test]
    async fn test_membership_step_by_step() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let (_session, closed) = session();
        let mut interrupts = rig.coordinator.interrupts(closed);

        let req = request("AUD", Some("AU"), FinalizeTarget::membership("monthly"), dec!(99));
        let order = rig.coordinator.create_order(&req).await.unwrap();
        assert_eq!(order.amount, dec!(99));
        assert_eq!(order.exchange_rate, Decimal::ONE);

        let payload = match rig
            .coordinator
            .present_gateway_interaction(order.id, &mut interrupts)
            .await
            .unwrap()
        {
            InteractionResult::Paid(payload) => payload,
            other => panic!("expected payment, got {:?}", other),
        };
        assert_eq!(rig.coordinator.order(&order.id).unwrap().status, OrderStatus::AwaitingGateway);
        assert_eq!(rig.international.opened()[0].amount, "99.00");

        let payment = rig.coordinator.verify_and_capture(order.id, payload).await.unwrap();
        assert!(payment.verified);
        assert_eq!(rig.coordinator.order(&order.id).unwrap().status, OrderStatus::Verifying);

        let confirmation = rig.coordinator.finalize(order.id).await.unwrap();
        assert_eq!(confirmation.target_reference, "membership-monthly");
        assert!(rig.coordinator.order(&order.id).is_none());
    }
}
