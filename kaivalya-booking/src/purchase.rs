use kaivalya_catalog::{MembershipPlan, PriceQuote, PricingEngine, Program};
use kaivalya_order::{CheckoutError, CheckoutOutcome, CheckoutRequest, FinalizeTarget, OrderLifecycleCoordinator};
use tracing::info;

use crate::session::CheckoutSession;

/// Checkout outside the booking wizard: membership plans and program enrollment.
/// One purchase runs per session at a time.
pub struct Purchase<'a> {
    coordinator: &'a OrderLifecycleCoordinator,
    pricing: &'a PricingEngine,
    country_code: Option<String>,
}

impl<'a> Purchase<'a> {
    pub fn new(coordinator: &'a OrderLifecycleCoordinator, pricing: &'a PricingEngine) -> Self {
        Self {
            coordinator,
            pricing,
            country_code: None,
        }
    }

    pub fn with_country(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    pub async fn membership(
        &self,
        plan: MembershipPlan,
        session: &CheckoutSession,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let quote = self.pricing.quote_membership(plan);
        self.run(
            quote,
            FinalizeTarget::membership(plan.code()),
            format!("Membership: {}", plan.code()),
            session,
        )
        .await
    }

    pub async fn enrollment(&self, program: &Program, session: &CheckoutSession) -> Result<CheckoutOutcome, CheckoutError> {
        let quote = self.pricing.quote_program(program);
        self.run(
            quote,
            FinalizeTarget::enrollment(program.id.clone()),
            format!("Program enrollment: {}", program.name),
            session,
        )
        .await
    }

    async fn run(
        &self,
        quote: PriceQuote,
        target: FinalizeTarget,
        description: String,
        session: &CheckoutSession,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        info!("Starting {} checkout for {} {}", target.flow, quote.total, quote.currency);
        let request = CheckoutRequest {
            draft_id: session.id(),
            base_amount: quote.total,
            display_currency: self.coordinator.currency().selected_code(),
            country_code: self.country_code.clone(),
            description,
            target,
        };
        self.coordinator.run(request, session.closed()).await
    }
}
