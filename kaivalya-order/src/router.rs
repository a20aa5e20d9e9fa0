use kaivalya_core::payment::{GatewayAdapter, GatewayProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatewayRoute {
    Domestic,
    International,
}

/// Pick the payment integration for a checkout.
///
/// Domestic when the payer is in India or pays in rupees, international otherwise.
pub fn route(currency_code: &str, country_code: Option<&str>) -> GatewayRoute {
    let in_india = country_code.is_some_and(|c| c.eq_ignore_ascii_case("IN"));
    if in_india || currency_code.eq_ignore_ascii_case("INR") {
        GatewayRoute::Domestic
    } else {
        GatewayRoute::International
    }
}

/// Routing outcome frozen into an order when it is opened. A later change of
/// display currency never re-routes the order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingDecision {
    pub route: GatewayRoute,
    pub provider: GatewayProvider,
    pub display_currency: String,
    /// Currency the provider will actually charge
    pub settlement_currency: String,
    pub country_code: Option<String>,
}

/// Holds one adapter per route
#[derive(Clone)]
pub struct PaymentGatewayRouter {
    domestic: Arc<dyn GatewayAdapter>,
    international: Arc<dyn GatewayAdapter>,
}

impl PaymentGatewayRouter {
    pub fn new(domestic: Arc<dyn GatewayAdapter>, international: Arc<dyn GatewayAdapter>) -> Self {
        Self { domestic, international }
    }

    pub fn decide(&self, display_currency: &str, country_code: Option<&str>) -> RoutingDecision {
        let route = route(display_currency, country_code);
        let adapter = self.adapter(route);
        RoutingDecision {
            route,
            provider: adapter.provider(),
            display_currency: display_currency.to_string(),
            settlement_currency: adapter.settlement_currency(display_currency),
            country_code: country_code.map(str::to_string),
        }
    }

    pub fn adapter(&self, route: GatewayRoute) -> Arc<dyn GatewayAdapter> {
        match route {
            GatewayRoute::Domestic => Arc::clone(&self.domestic),
            GatewayRoute::International => Arc::clone(&self.international),
        }
    }
}
