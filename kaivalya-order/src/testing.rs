//! Scripted stand-ins for the backend, the provider SDKs and the event sink.

use async_trait::async_trait;
use kaivalya_catalog::CurrencyConversionService;
use kaivalya_core::backend::{
    CheckoutBackend, CreateOrderRequest, CreatedOrder, FinalizeRequest, FinalizeResponse, GatewayConfig,
    VerifyRequest, VerifyResponse,
};
use kaivalya_core::events::EventSink;
use kaivalya_core::payment::{GatewayCallbacks, GatewayPayload, GatewayProvider};
use kaivalya_core::preferences::MemoryPreferenceStore;
use kaivalya_core::{CoreError, CoreResult};
use kaivalya_shared::models::events::CheckoutEvent;
use kaivalya_shared::Masked;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::coordinator::{CoordinatorSettings, OrderLifecycleCoordinator};
use crate::gateways::{
    DomesticCheckoutOptions, DomesticCheckoutSdk, DomesticGateway, InternationalButtonOptions,
    InternationalButtonsSdk, InternationalGateway,
};
use crate::router::PaymentGatewayRouter;

pub const DOMESTIC_KEY: &str = "rzp_test_key";
pub const INTERNATIONAL_CLIENT_ID: &str = "paypal-sandbox-client";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend that succeeds unless told otherwise and counts every call.
///
/// Queued errors are returned by the next calls of that endpoint, one each.
#[derive(Default)]
pub struct ScriptedBackend {
    create_errors: Mutex<VecDeque<CoreError>>,
    verify_errors: Mutex<VecDeque<CoreError>>,
    finalize_errors: Mutex<VecDeque<CoreError>>,
    reject_payments: AtomicBool,
    create_delay: Mutex<Duration>,
    finalize_delay: Mutex<Duration>,
    create_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    config_calls: AtomicUsize,
    created: Mutex<Vec<CreateOrderRequest>>,
    verified: Mutex<Vec<VerifyRequest>>,
    finalized: Mutex<Vec<FinalizeRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(self, err: CoreError) -> Self {
        lock(&self.create_errors).push_back(err);
        self
    }

    pub fn fail_verify(self, err: CoreError) -> Self {
        lock(&self.verify_errors).push_back(err);
        self
    }

    pub fn fail_finalize(self, err: CoreError) -> Self {
        lock(&self.finalize_errors).push_back(err);
        self
    }

    /// Verification answers `verified: false`
    pub fn reject_payments(self) -> Self {
        self.reject_payments.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_create_delay(self, delay: Duration) -> Self {
        *lock(&self.create_delay) = delay;
        self
    }

    pub fn with_finalize_delay(self, delay: Duration) -> Self {
        *lock(&self.finalize_delay) = delay;
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn config_calls(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<CreateOrderRequest> {
        lock(&self.created).clone()
    }

    pub fn verified(&self) -> Vec<VerifyRequest> {
        lock(&self.verified).clone()
    }

    pub fn finalized(&self) -> Vec<FinalizeRequest> {
        lock(&self.finalized).clone()
    }
}

#[async_trait]
impl CheckoutBackend for ScriptedBackend {
    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<CreatedOrder> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.created).push(request.clone());

        let delay = *lock(&self.create_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.create_errors).pop_front() {
            return Err(err);
        }

        Ok(match request.provider {
            GatewayProvider::Razorpay => CreatedOrder {
                order_id: format!("ord_{}", n),
                gateway_order_id: format!("order_rzp_{}", n),
                public_key: Some(Masked::new(DOMESTIC_KEY.to_string())),
            },
            // The international create endpoint does not return the client id
            GatewayProvider::PayPal => CreatedOrder {
                order_id: format!("ord_{}", n),
                gateway_order_id: format!("PAYPAL-{}", n),
                public_key: None,
            },
        })
    }

    async fn verify_order(&self, request: &VerifyRequest) -> CoreResult<VerifyResponse> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.verified).push(request.clone());
        if let Some(err) = lock(&self.verify_errors).pop_front() {
            return Err(err);
        }
        Ok(VerifyResponse {
            payment_id: request.provider_payment_id.clone(),
            verified: !self.reject_payments.load(Ordering::SeqCst),
        })
    }

    async fn finalize(&self, request: &FinalizeRequest) -> CoreResult<FinalizeResponse> {
        let n = self.finalize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.finalized).push(request.clone());

        let delay = *lock(&self.finalize_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.finalize_errors).pop_front() {
            return Err(err);
        }
        Ok(FinalizeResponse {
            confirmation_id: format!("KV-{:05}", n),
            target_reference: format!("{}-{}", request.flow, request.target_id),
        })
    }

    async fn gateway_config(&self, provider: GatewayProvider) -> CoreResult<GatewayConfig> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        let key = match provider {
            GatewayProvider::Razorpay => DOMESTIC_KEY,
            GatewayProvider::PayPal => INTERNATIONAL_CLIENT_ID,
        };
        Ok(GatewayConfig {
            public_key: Masked::new(key.to_string()),
        })
    }
}

/// How a scripted provider UI behaves once opened
#[derive(Debug, Clone, PartialEq)]
pub enum SdkScript {
    Pay,
    /// Reports success twice, like a double-fired handler
    PayTwice,
    Cancel,
    Fail(String),
    /// Shows the UI and reports nothing until `fire_late_success`
    Hold,
    FailToOpen(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenedCheckout {
    pub key: String,
    pub order_id: String,
    pub currency: String,
    /// As handed to the SDK: paise for domestic, a decimal string internationally
    pub amount: String,
}

/// Provider UI fake implementing both SDK shapes
pub struct ScriptedSdk {
    script: Mutex<SdkScript>,
    opened: Mutex<Vec<OpenedCheckout>>,
    held: Mutex<Vec<GatewayCallbacks>>,
    payments: AtomicUsize,
}

impl ScriptedSdk {
    pub fn new(script: SdkScript) -> Self {
        Self {
            script: Mutex::new(script),
            opened: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            payments: AtomicUsize::new(0),
        }
    }

    pub fn set_script(&self, script: SdkScript) {
        *lock(&self.script) = script;
    }

    pub fn opened(&self) -> Vec<OpenedCheckout> {
        lock(&self.opened).clone()
    }

    /// Report success on every callback surface ever handed out. Returns how many
    /// still had a listener.
    pub fn fire_late_success(&self) -> usize {
        let held = lock(&self.held);
        let mut attached = 0;
        for (i, callbacks) in held.iter().enumerate() {
            if !callbacks.is_detached() {
                attached += 1;
            }
            callbacks.on_success(GatewayPayload {
                provider_order_id: format!("late_{}", i),
                provider_payment_id: format!("pay_late_{}", i),
                provider_signature: None,
                raw: serde_json::json!({ "late": true }),
            });
        }
        attached
    }

    fn payload(&self, order_id: &str, signed: bool) -> GatewayPayload {
        let n = self.payments.fetch_add(1, Ordering::SeqCst) + 1;
        let payment_id = format!("pay_{}", n);
        GatewayPayload {
            provider_order_id: order_id.to_string(),
            provider_payment_id: payment_id.clone(),
            provider_signature: signed.then(|| Masked::new(format!("sig_{}", n))),
            raw: serde_json::json!({ "order_id": order_id, "payment_id": payment_id }),
        }
    }

    fn play(&self, order_id: &str, callbacks: GatewayCallbacks, signed: bool) -> CoreResult<()> {
        let script = lock(&self.script).clone();
        match script {
            SdkScript::Pay => callbacks.on_success(self.payload(order_id, signed)),
            SdkScript::PayTwice => {
                callbacks.on_success(self.payload(order_id, signed));
                callbacks.on_success(self.payload(order_id, signed));
            }
            SdkScript::Cancel => callbacks.on_cancel(),
            SdkScript::Fail(reason) => callbacks.on_error(reason),
            SdkScript::Hold => {}
            SdkScript::FailToOpen(reason) => return Err(CoreError::GatewayError(reason)),
        }
        lock(&self.held).push(callbacks);
        Ok(())
    }
}

#[async_trait]
impl DomesticCheckoutSdk for ScriptedSdk {
    async fn open(&self, options: DomesticCheckoutOptions, callbacks: GatewayCallbacks) -> CoreResult<()> {
        lock(&self.opened).push(OpenedCheckout {
            key: options.key.expose().clone(),
            order_id: options.order_id.clone(),
            currency: options.currency.clone(),
            amount: options.amount_paise.to_string(),
        });
        self.play(&options.order_id, callbacks, true)
    }
}

#[async_trait]
impl InternationalButtonsSdk for ScriptedSdk {
    async fn render(&self, options: InternationalButtonOptions, callbacks: GatewayCallbacks) -> CoreResult<()> {
        lock(&self.opened).push(OpenedCheckout {
            key: options.client_id.expose().clone(),
            order_id: options.order_id.clone(),
            currency: options.currency.clone(),
            amount: options.amount.clone(),
        });
        self.play(&options.order_id, callbacks, false)
    }
}

/// Keeps every published event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CheckoutEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<CheckoutEvent> {
        lock(&self.events).clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &CheckoutEvent) -> CoreResult<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// A coordinator wired to scripted collaborators
pub struct CheckoutRig {
    pub backend: Arc<ScriptedBackend>,
    pub domestic: Arc<ScriptedSdk>,
    pub international: Arc<ScriptedSdk>,
    pub currency: Arc<CurrencyConversionService>,
    pub events: Arc<RecordingSink>,
    pub coordinator: Arc<OrderLifecycleCoordinator>,
}

impl CheckoutRig {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with_request_timeout(backend, Duration::from_secs(2))
    }

    pub fn with_request_timeout(backend: ScriptedBackend, request_timeout: Duration) -> Self {
        let backend = Arc::new(backend);
        let domestic = Arc::new(ScriptedSdk::new(SdkScript::Pay));
        let international = Arc::new(ScriptedSdk::new(SdkScript::Pay));
        let currency = Arc::new(
            CurrencyConversionService::with_defaults(Arc::new(MemoryPreferenceStore::new()))
                .expect("default currency settings are valid"),
        );
        let events = Arc::new(RecordingSink::default());

        let router = PaymentGatewayRouter::new(
            Arc::new(DomesticGateway::new(backend.clone(), domestic.clone())),
            Arc::new(InternationalGateway::new(backend.clone(), international.clone())),
        );
        let coordinator = Arc::new(OrderLifecycleCoordinator::new(
            backend.clone(),
            router,
            currency.clone(),
            events.clone(),
            CoordinatorSettings {
                request_timeout,
                merchant_name: "Kaivalya".to_string(),
            },
        ));

        Self {
            backend,
            domestic,
            international,
            currency,
            events,
            coordinator,
        }
    }
}
