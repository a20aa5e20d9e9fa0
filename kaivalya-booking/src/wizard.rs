use chrono::{NaiveDate, NaiveTime, Utc};
use kaivalya_catalog::{CurrencyConversionService, PriceQuote, PricingEngine, Professional, ServiceOffering};
use kaivalya_order::{
    AbandonReason, BookingConfirmation, CheckoutError, CheckoutOutcome, CheckoutRequest, FinalizeTarget,
    OrderLifecycleCoordinator,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::draft::BookingDraft;
use crate::schedule;
use crate::session::{CheckoutSession, SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WizardStep {
    ServiceSelection = 1,
    Scheduling = 2,
    Details = 3,
    Review = 4,
    Confirmed = 5,
}

impl WizardStep {
    pub fn number(self) -> u8 {
        self as u8
    }

    fn previous(self) -> Self {
        match self {
            WizardStep::ServiceSelection | WizardStep::Scheduling => WizardStep::ServiceSelection,
            WizardStep::Details => WizardStep::Scheduling,
            WizardStep::Review => WizardStep::Details,
            WizardStep::Confirmed => WizardStep::Confirmed,
        }
    }
}

/// A step guard refused to move forward
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please choose a service")]
    ServiceRequired,

    #[error("Service {0} is not offered")]
    UnknownService(String),

    #[error("Please choose a date and a time")]
    ScheduleRequired,

    #[error("{0} is not an available date")]
    DateUnavailable(NaiveDate),

    #[error("{0} is not an available time")]
    TimeUnavailable(NaiveTime),

    #[error("Please describe the reason for your visit in at least {min} characters ({actual} so far)")]
    ReasonTooShort { min: usize, actual: usize },

    #[error("Please accept the terms to continue")]
    TermsNotAccepted,
}

#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("The booking wizard is closed")]
    Closed,

    #[error("{field} is collected on step {expected:?}, the wizard is on {current:?}")]
    WrongStep {
        field: &'static str,
        expected: WizardStep,
        current: WizardStep,
    },

    #[error("Review is left by paying")]
    PaymentPending,

    #[error("This booking is already confirmed")]
    AlreadyConfirmed,

    #[error("The last payment was not confirmed; close the wizard before paying again")]
    PaymentUnconfirmed,

    #[error("Payment {payment_id} was taken but the booking was not created (order {order_id})")]
    SupportRequired { order_id: Uuid, payment_id: String },

    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

/// Message shown above the current step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    Error(String),
    Notice(String),
    /// Locks the wizard until it is closed
    SupportRequired { order_id: Uuid, payment_id: String, message: String },
}

/// Handed to the success collaborator once a booking is confirmed
#[derive(Debug, Clone)]
pub struct BookingSnapshot {
    pub draft: BookingDraft,
    pub professional: Professional,
    pub service: ServiceOffering,
    pub confirmation: BookingConfirmation,
}

impl BookingSnapshot {
    pub fn confirmation_number(&self) -> &str {
        &self.confirmation.confirmation_number
    }
}

pub trait BookingObserver: Send + Sync {
    fn on_confirmed(&self, snapshot: &BookingSnapshot);
}

#[derive(Debug, Clone)]
pub struct WizardSettings {
    pub min_reason_chars: usize,
    /// Payer's country, when known. Drives domestic routing.
    pub country_code: Option<String>,
    pub booking_window_days: u64,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            min_reason_chars: 10,
            country_code: None,
            booking_window_days: schedule::BOOKING_WINDOW_DAYS,
        }
    }
}

struct OpenState {
    step: WizardStep,
    draft: BookingDraft,
    session: CheckoutSession,
    review_total: Option<PriceQuote>,
    banner: Option<Banner>,
    confirmation: Option<BookingConfirmation>,
    /// Set after a payment the backend could not confirm. Blocks further payment.
    payment_unconfirmed: bool,
}

impl OpenState {
    fn new(pre_selected: Option<&str>) -> Self {
        Self {
            step: WizardStep::ServiceSelection,
            draft: BookingDraft::new(pre_selected),
            session: CheckoutSession::new(),
            review_total: None,
            banner: None,
            confirmation: None,
            payment_unconfirmed: false,
        }
    }

    fn ensure_unlocked(&self) -> Result<(), WizardError> {
        match &self.banner {
            Some(Banner::SupportRequired { order_id, payment_id, .. }) => Err(WizardError::SupportRequired {
                order_id: *order_id,
                payment_id: payment_id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Four-step booking flow for one professional, ending in payment.
///
/// Nothing exists while the wizard is closed. Each opening gets a fresh draft and
/// a fresh [`CheckoutSession`]; closing cancels the session and drops the draft.
pub struct BookingWizard {
    professional: Professional,
    services: Vec<ServiceOffering>,
    pre_selected: Option<String>,
    pricing: PricingEngine,
    currency: Arc<CurrencyConversionService>,
    coordinator: Arc<OrderLifecycleCoordinator>,
    observer: Option<Arc<dyn BookingObserver>>,
    settings: WizardSettings,
    state: Option<OpenState>,
}

impl BookingWizard {
    pub fn new(
        professional: Professional,
        services: Vec<ServiceOffering>,
        pricing: PricingEngine,
        coordinator: Arc<OrderLifecycleCoordinator>,
        settings: WizardSettings,
    ) -> Self {
        Self {
            professional,
            services,
            pre_selected: None,
            pricing,
            currency: Arc::clone(coordinator.currency()),
            coordinator,
            observer: None,
            settings,
            state: None,
        }
    }

    /// Service chosen on the page before the wizard was opened
    pub fn with_pre_selected(mut self, service_id: impl Into<String>) -> Self {
        self.pre_selected = Some(service_id.into());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BookingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn open(&mut self) -> WizardStep {
        if let Some(state) = &self.state {
            return state.step;
        }
        let state = OpenState::new(self.pre_selected.as_deref());
        info!("Booking wizard opened for {} (draft {})", self.professional.name, state.draft.id);
        self.state = Some(state);
        WizardStep::ServiceSelection
    }

    /// Cancel the session and forget the draft. Anything still in flight for this
    /// opening finishes without touching the wizard.
    pub fn close(&mut self) {
        if let Some(state) = self.state.take() {
            state.session.close();
            info!(
                "Booking wizard closed on step {} (draft {})",
                state.step.number(),
                state.draft.id
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn step(&self) -> Option<WizardStep> {
        self.state.as_ref().map(|s| s.step)
    }

    pub fn draft(&self) -> Option<&BookingDraft> {
        self.state.as_ref().map(|s| &s.draft)
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.state.as_ref().and_then(|s| s.banner.as_ref())
    }

    pub fn confirmation(&self) -> Option<&BookingConfirmation> {
        self.state.as_ref().and_then(|s| s.confirmation.as_ref())
    }

    pub fn session_handle(&self) -> Option<SessionHandle> {
        self.state.as_ref().map(|s| s.session.handle())
    }

    pub fn professional(&self) -> &Professional {
        &self.professional
    }

    pub fn services(&self) -> &[ServiceOffering] {
        &self.services
    }

    /// Price of a service in the selected display currency
    pub fn display_price(&self, service: &ServiceOffering) -> String {
        self.currency.format_price(service.price)
    }

    pub fn available_dates(&self) -> Vec<NaiveDate> {
        schedule::available_dates(today(), self.settings.booking_window_days)
    }

    pub fn time_slots(&self) -> Vec<NaiveTime> {
        schedule::time_slots()
    }

    /// Base-currency total computed when Review was entered
    pub fn total(&self) -> Option<&PriceQuote> {
        self.state.as_ref().and_then(|s| s.review_total.as_ref())
    }

    /// The Review total in the selected display currency
    pub fn display_total(&self) -> Option<String> {
        self.total().map(|quote| self.currency.format_price(quote.total))
    }

    pub fn select_service(&mut self, service_id: &str) -> Result<(), WizardError> {
        if !self.services.iter().any(|s| s.id == service_id) {
            return Err(ValidationError::UnknownService(service_id.to_string()).into());
        }
        self.editable("service", WizardStep::ServiceSelection)?.service_id = Some(service_id.to_string());
        Ok(())
    }

    pub fn select_date(&mut self, date: NaiveDate) -> Result<(), WizardError> {
        if !schedule::is_available_date(date, today(), self.settings.booking_window_days) {
            return Err(ValidationError::DateUnavailable(date).into());
        }
        self.editable("date", WizardStep::Scheduling)?.selected_date = Some(date);
        Ok(())
    }

    pub fn select_time(&mut self, time: NaiveTime) -> Result<(), WizardError> {
        if !schedule::is_available_time(time) {
            return Err(ValidationError::TimeUnavailable(time).into());
        }
        self.editable("time", WizardStep::Scheduling)?.selected_time = Some(time);
        Ok(())
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) -> Result<(), WizardError> {
        self.editable("reason", WizardStep::Details)?.reason = reason.into();
        Ok(())
    }

    pub fn set_concerns(&mut self, concerns: impl Into<String>) -> Result<(), WizardError> {
        self.editable("concerns", WizardStep::Details)?.concerns = concerns.into();
        Ok(())
    }

    pub fn set_special_requests(&mut self, requests: impl Into<String>) -> Result<(), WizardError> {
        self.editable("special requests", WizardStep::Details)?.special_requests = requests.into();
        Ok(())
    }

    pub fn set_agree_to_terms(&mut self, agree: bool) -> Result<(), WizardError> {
        self.editable("terms", WizardStep::Review)?.agree_to_terms = agree;
        Ok(())
    }

    /// Move forward one step if the current step's guard passes. Review is left
    /// only through [`BookingWizard::confirm_and_pay`].
    pub fn next(&mut self) -> Result<WizardStep, WizardError> {
        let state = self.state()?;
        state.ensure_unlocked()?;

        let target = match state.step {
            WizardStep::ServiceSelection => {
                self.service(&state.draft)?;
                WizardStep::Scheduling
            }
            WizardStep::Scheduling => {
                if !state.draft.has_schedule() {
                    return Err(ValidationError::ScheduleRequired.into());
                }
                WizardStep::Details
            }
            WizardStep::Details => {
                let actual = state.draft.reason_len();
                if actual < self.settings.min_reason_chars {
                    return Err(ValidationError::ReasonTooShort {
                        min: self.settings.min_reason_chars,
                        actual,
                    }
                    .into());
                }
                WizardStep::Review
            }
            WizardStep::Review => return Err(WizardError::PaymentPending),
            WizardStep::Confirmed => return Err(WizardError::AlreadyConfirmed),
        };

        let review_total = match target {
            WizardStep::Review => Some(self.pricing.quote_booking(self.service(&state.draft)?)),
            _ => None,
        };

        let state = self.state_mut()?;
        state.step = target;
        state.banner = None;
        state.review_total = review_total;
        debug!("Wizard moved to step {}", target.number());
        Ok(target)
    }

    /// Go back one step, stopping at the first
    pub fn back(&mut self) -> Result<WizardStep, WizardError> {
        let state = self.state_mut()?;
        state.ensure_unlocked()?;
        if state.step == WizardStep::Confirmed {
            return Err(WizardError::AlreadyConfirmed);
        }

        state.step = state.step.previous();
        state.banner = None;
        state.review_total = None;
        Ok(state.step)
    }

    /// Pay for the reviewed booking and wait for the outcome.
    ///
    /// Cancelling in the provider UI returns `Ok(Review)` with no banner. Failures
    /// before the payer paid leave the wizard on Review with an error banner so they
    /// can try again. A payment the backend could not confirm blocks paying again
    /// until the wizard is closed, and a payment taken without a booking locks it.
    pub async fn confirm_and_pay(&mut self) -> Result<WizardStep, WizardError> {
        let (request, closed) = {
            let state = self.state()?;
            state.ensure_unlocked()?;
            if state.payment_unconfirmed {
                return Err(WizardError::PaymentUnconfirmed);
            }
            if state.step != WizardStep::Review {
                return Err(WizardError::WrongStep {
                    field: "payment",
                    expected: WizardStep::Review,
                    current: state.step,
                });
            }
            if !state.draft.agree_to_terms {
                return Err(ValidationError::TermsNotAccepted.into());
            }

            let service = self.service(&state.draft)?;
            let quote = self.pricing.quote_booking(service);
            let request = CheckoutRequest {
                draft_id: state.draft.id,
                base_amount: quote.total,
                display_currency: self.currency.selected_code(),
                country_code: self.settings.country_code.clone(),
                description: format!("{} with {}", service.name, self.professional.name),
                target: FinalizeTarget::booking(service.id.clone()),
            };
            (request, state.session.closed())
        };

        let coordinator = Arc::clone(&self.coordinator);
        let result = coordinator.run(request, closed).await;

        if self.state.as_ref().map_or(true, |s| s.session.is_closed()) {
            if let Ok(CheckoutOutcome::Completed(confirmation)) = &result {
                info!(
                    "Booking {} completed after the wizard was closed",
                    confirmation.confirmation_number
                );
            }
            self.close();
            return Err(WizardError::Closed);
        }

        match result {
            Ok(CheckoutOutcome::Completed(confirmation)) => self.complete(confirmation),
            Ok(CheckoutOutcome::Cancelled) => {
                debug!("Payer closed the payment window");
                Ok(WizardStep::Review)
            }
            Ok(CheckoutOutcome::Failed(e)) | Err(e) => self.fail(e),
            Ok(CheckoutOutcome::Abandoned(AbandonReason::CurrencyChanged)) => {
                let state = self.state_mut()?;
                state.banner = Some(Banner::Notice(
                    "The display currency changed. Check the new total and pay again.".to_string(),
                ));
                Ok(WizardStep::Review)
            }
            Ok(CheckoutOutcome::Abandoned(AbandonReason::SessionClosed)) => {
                self.close();
                Err(WizardError::Closed)
            }
            Ok(CheckoutOutcome::ReconciliationGap { order_id, payment_id }) => {
                error!(
                    "Booking wizard locked: order {} payment {} needs support",
                    order_id, payment_id
                );
                let state = self.state_mut()?;
                state.banner = Some(Banner::SupportRequired {
                    order_id,
                    payment_id: payment_id.clone(),
                    message: format!(
                        "Your payment went through but we could not complete the booking. \
                         Please contact support with payment reference {}.",
                        payment_id
                    ),
                });
                Err(WizardError::SupportRequired { order_id, payment_id })
            }
        }
    }

    fn complete(&mut self, confirmation: BookingConfirmation) -> Result<WizardStep, WizardError> {
        let snapshot = {
            let state = self.state()?;
            BookingSnapshot {
                draft: state.draft.clone(),
                professional: self.professional.clone(),
                service: self.service(&state.draft)?.clone(),
                confirmation: confirmation.clone(),
            }
        };
        let fresh = BookingDraft::new(self.pre_selected.as_deref());

        let state = self.state_mut()?;
        state.step = WizardStep::Confirmed;
        state.draft = fresh;
        state.banner = None;
        state.review_total = None;
        state.confirmation = Some(confirmation);
        info!("Booking confirmed: {}", snapshot.confirmation_number());

        if let Some(observer) = &self.observer {
            observer.on_confirmed(&snapshot);
        }
        Ok(WizardStep::Confirmed)
    }

    fn fail(&mut self, e: CheckoutError) -> Result<WizardStep, WizardError> {
        let unconfirmed = e.is_unconfirmed_payment();
        let message = if unconfirmed {
            error!("Payment could not be confirmed, blocking another attempt: {}", e);
            "We could not confirm your payment. Please do not pay again; \
             contact support so we can check whether you were charged."
                .to_string()
        } else if e.is_retryable() && e.is_network() {
            warn!("Checkout failed: {}", e);
            "We could not reach the payment service. Please try again.".to_string()
        } else {
            warn!("Checkout failed: {}", e);
            match &e {
                CheckoutError::Gateway(reason) => format!("Payment failed: {}", reason),
                other => other.to_string(),
            }
        };
        if let Some(state) = self.state.as_mut() {
            state.banner = Some(Banner::Error(message));
            state.payment_unconfirmed |= unconfirmed;
        }
        Err(WizardError::Checkout(e))
    }

    fn state(&self) -> Result<&OpenState, WizardError> {
        self.state.as_ref().ok_or(WizardError::Closed)
    }

    fn state_mut(&mut self) -> Result<&mut OpenState, WizardError> {
        self.state.as_mut().ok_or(WizardError::Closed)
    }

    fn editable(&mut self, field: &'static str, step: WizardStep) -> Result<&mut BookingDraft, WizardError> {
        let state = self.state_mut()?;
        state.ensure_unlocked()?;
        if state.step != step {
            return Err(WizardError::WrongStep {
                field,
                expected: step,
                current: state.step,
            });
        }
        Ok(&mut state.draft)
    }

    fn service(&self, draft: &BookingDraft) -> Result<&ServiceOffering, ValidationError> {
        let id = draft.service_id.as_deref().ok_or(ValidationError::ServiceRequired)?;
        self.services
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ValidationError::UnknownService(id.to_string()))
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;
    use kaivalya_catalog::PricingConfig;
    use kaivalya_core::CoreError;
    use kaivalya_order::testing::{CheckoutRig, ScriptedBackend, SdkScript};
    use rust_decimal_macros::dec;

    fn services() -> Vec<ServiceOffering> {
        vec![
            ServiceOffering {
                id: "hatha-60".into(),
                name: "Hatha Yoga".into(),
                description: None,
                duration_minutes: 60,
                price: dec!(84),
            },
            ServiceOffering {
                id: "reiki-45".into(),
                name: "Reiki".into(),
                description: Some("Energy healing".into()),
                duration_minutes: 45,
                price: dec!(120),
            },
        ]
    }

    fn wizard(rig: &CheckoutRig) -> BookingWizard {
        BookingWizard::new(
            Professional {
                id: "pro-1".into(),
                name: "Asha Rao".into(),
            },
            services(),
            PricingEngine::new(PricingConfig::default()),
            rig.coordinator.clone(),
            WizardSettings::default(),
        )
    }

    fn tomorrow() -> NaiveDate {
        today().checked_add_days(Days::new(1)).unwrap()
    }

    fn ten_am() -> NaiveTime {
        NaiveTime::from_hms_opt(10, 0, 0).unwrap()
    }

    fn to_review(wizard: &mut BookingWizard) {
        wizard.open();
        wizard.select_service("hatha-60").unwrap();
        wizard.next().unwrap();
        wizard.select_date(tomorrow()).unwrap();
        wizard.select_time(ten_am()).unwrap();
        wizard.next().unwrap();
        wizard.set_reason("Lower back stiffness").unwrap();
        wizard.next().unwrap();
    }

    #[test]
    fn test_service_required_on_step_one() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig);
        wizard.open();

        assert!(matches!(
            wizard.next(),
            Err(WizardError::Validation(ValidationError::ServiceRequired))
        ));
        assert_eq!(wizard.step(), Some(WizardStep::ServiceSelection));

        assert!(matches!(
            wizard.select_service("tarot"),
            Err(WizardError::Validation(ValidationError::UnknownService(_)))
        ));
        wizard.select_service("reiki-45").unwrap();
        assert_eq!(wizard.next().unwrap(), WizardStep::Scheduling);
    }

    #[test]
    fn test_pre_selected_service_passes_step_one() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig).with_pre_selected("reiki-45");
        wizard.open();

        assert_eq!(wizard.draft().unwrap().service_id.as_deref(), Some("reiki-45"));
        assert_eq!(wizard.next().unwrap(), WizardStep::Scheduling);
    }

    #[test]
    fn test_schedule_required_on_step_two() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig).with_pre_selected("hatha-60");
        wizard.open();
        wizard.next().unwrap();

        wizard.select_date(tomorrow()).unwrap();
        assert!(matches!(
            wizard.next(),
            Err(WizardError::Validation(ValidationError::ScheduleRequired))
        ));

        let past = today().checked_sub_days(Days::new(1)).unwrap();
        assert!(matches!(
            wizard.select_date(past),
            Err(WizardError::Validation(ValidationError::DateUnavailable(_)))
        ));
        assert!(matches!(
            wizard.select_time(NaiveTime::from_hms_opt(12, 15, 0).unwrap()),
            Err(WizardError::Validation(ValidationError::TimeUnavailable(_)))
        ));

        wizard.select_time(ten_am()).unwrap();
        assert_eq!(wizard.next().unwrap(), WizardStep::Details);
    }

    #[test]
    fn test_reason_needs_ten_characters() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig).with_pre_selected("hatha-60");
        wizard.open();
        wizard.next().unwrap();
        wizard.select_date(tomorrow()).unwrap();
        wizard.select_time(ten_am()).unwrap();
        wizard.next().unwrap();

        wizard.set_reason("back pain").unwrap();
        assert!(matches!(
            wizard.next(),
            Err(WizardError::Validation(ValidationError::ReasonTooShort { min: 10, actual: 9 }))
        ));

        // Counted in characters, not bytes
        wizard.set_reason("धन्यवाद योग").unwrap();
        assert_eq!(wizard.next().unwrap(), WizardStep::Review);
    }

    #[test]
    fn test_back_is_never_blocked() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig);
        to_review(&mut wizard);

        // Invalid content on the way back does not matter
        assert_eq!(wizard.back().unwrap(), WizardStep::Details);
        wizard.set_reason("").unwrap();
        assert_eq!(wizard.back().unwrap(), WizardStep::Scheduling);
        assert_eq!(wizard.back().unwrap(), WizardStep::ServiceSelection);
        assert_eq!(wizard.back().unwrap(), WizardStep::ServiceSelection);
    }

    #[test]
    fn test_fields_editable_only_on_their_step() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig);
        wizard.open();

        assert!(matches!(
            wizard.set_reason("Trying to skip ahead"),
            Err(WizardError::WrongStep { expected: WizardStep::Details, .. })
        ));
        assert!(matches!(
            wizard.set_agree_to_terms(true),
            Err(WizardError::WrongStep { expected: WizardStep::Review, .. })
        ));
        assert!(wizard.draft().unwrap().reason.is_empty());
    }

    #[test]
    fn test_review_total_adds_platform_fee() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig);
        to_review(&mut wizard);

        let total = wizard.total().unwrap();
        assert_eq!(total.item_price, dec!(84));
        assert_eq!(total.platform_fee, dec!(5));
        assert_eq!(total.total, dec!(89));
        assert_eq!(wizard.display_total().unwrap(), "A$89");

        rig.currency.select("USD").unwrap();
        assert_eq!(wizard.display_total().unwrap(), "$59");
    }

    #[test]
    fn test_closed_wizard_refuses_steps() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig);

        assert!(matches!(wizard.next(), Err(WizardError::Closed)));
        assert!(matches!(wizard.select_service("hatha-60"), Err(WizardError::Closed)));
        assert_eq!(wizard.step(), None);
    }

    #[tokio::test]
    async fn test_terms_required_before_paying() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        let mut wizard = wizard(&rig);
        to_review(&mut wizard);

        assert!(matches!(
            wizard.confirm_and_pay().await,
            Err(WizardError::Validation(ValidationError::TermsNotAccepted))
        ));
        assert_eq!(rig.backend.create_calls(), 0);
        assert_eq!(wizard.step(), Some(WizardStep::Review));
    }

    #[tokio::test]
    async fn test_cancel_returns_to_review_silently() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        rig.international.set_script(SdkScript::Cancel);
        let mut wizard = wizard(&rig);
        to_review(&mut wizard);
        wizard.set_agree_to_terms(true).unwrap();

        assert_eq!(wizard.confirm_and_pay().await.unwrap(), WizardStep::Review);
        assert!(wizard.banner().is_none());
        assert_eq!(rig.backend.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_verify_blocks_paying_again() {
        let rig = CheckoutRig::new(ScriptedBackend::new().fail_verify(CoreError::Rejected {
            status: 400,
            message: "Invalid payment signature".into(),
        }));
        let mut wizard = wizard(&rig);
        to_review(&mut wizard);
        wizard.set_agree_to_terms(true).unwrap();

        assert!(matches!(
            wizard.confirm_and_pay().await,
            Err(WizardError::Checkout(CheckoutError::Verify(_)))
        ));
        assert_eq!(wizard.step(), Some(WizardStep::Review));
        match wizard.banner() {
            Some(Banner::Error(message)) => {
                assert!(message.contains("could not confirm your payment"));
                assert!(message.contains("do not pay again"));
            }
            other => panic!("expected an error banner, got {:?}", other),
        }

        // Backing out and returning to Review does not clear the block
        wizard.back().unwrap();
        wizard.next().unwrap();
        assert!(matches!(
            wizard.confirm_and_pay().await,
            Err(WizardError::PaymentUnconfirmed)
        ));
        assert_eq!(rig.backend.create_calls(), 1);
        assert_eq!(rig.backend.verify_calls(), 1);

        wizard.close();
        to_review(&mut wizard);
        wizard.set_agree_to_terms(true).unwrap();
        assert_eq!(wizard.confirm_and_pay().await.unwrap(), WizardStep::Confirmed);
        assert_eq!(rig.backend.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_gateway_error_shows_banner() {
        let rig = CheckoutRig::new(ScriptedBackend::new());
        rig.international.set_script(SdkScript::Fail("card declined".into()));
        let mut wizard = wizard(&rig);
        to_review(&mut wizard);
        wizard.set_agree_to_terms(true).unwrap();

        assert!(matches!(
            wizard.confirm_and_pay().await,
            Err(WizardError::Checkout(CheckoutError::Gateway(_)))
        ));
        assert_eq!(wizard.step(), Some(WizardStep::Review));
        assert_eq!(
            wizard.banner(),
            Some(&Banner::Error("Payment failed: card declined".into()))
        );
    }
}
