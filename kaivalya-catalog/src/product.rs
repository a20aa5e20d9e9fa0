use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A bookable session offered by a professional. Prices are in the base currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Professional {
    pub id: String,
    pub name: String,
}

/// Membership packages sold through the checkout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MembershipPlan {
    DropIn,
    Monthly,
    Quarterly,
}

impl MembershipPlan {
    pub fn code(&self) -> &'static str {
        match self {
            MembershipPlan::DropIn => "drop_in",
            MembershipPlan::Monthly => "monthly",
            MembershipPlan::Quarterly => "quarterly",
        }
    }

    pub fn base_price(&self) -> Decimal {
        match self {
            MembershipPlan::DropIn => Decimal::new(29, 0),
            MembershipPlan::Monthly => Decimal::new(99, 0),
            MembershipPlan::Quarterly => Decimal::new(249, 0),
        }
    }

    /// Class credits; `None` means unlimited
    pub fn credits(&self) -> Option<u32> {
        match self {
            MembershipPlan::DropIn => Some(1),
            MembershipPlan::Monthly | MembershipPlan::Quarterly => None,
        }
    }

    /// Validity window of a membership bought at `start`
    pub fn validity(&self, start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = match self {
            MembershipPlan::DropIn => start + chrono::Duration::days(1),
            MembershipPlan::Monthly => start.checked_add_months(Months::new(1)).unwrap_or(start),
            MembershipPlan::Quarterly => start.checked_add_months(Months::new(3)).unwrap_or(start),
        };
        (start, end)
    }
}

impl FromStr for MembershipPlan {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_in" => Ok(MembershipPlan::DropIn),
            "monthly" => Ok(MembershipPlan::Monthly),
            "quarterly" => Ok(MembershipPlan::Quarterly),
            other => Err(ProductError::UnknownPlan(other.to_string())),
        }
    }
}

/// A multi-week program students enroll in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub price: Decimal,
}

impl Program {
    pub fn standard() -> Vec<Program> {
        vec![
            Program {
                id: "foundation".to_string(),
                name: "Foundation Course".to_string(),
                price: Decimal::new(149, 0),
            },
            Program {
                id: "meditation".to_string(),
                name: "Meditation Program".to_string(),
                price: Decimal::new(89, 0),
            },
            Program {
                id: "teacher_training".to_string(),
                name: "Teacher Training".to_string(),
                price: Decimal::new(899, 0),
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProductError {
    #[error("Unknown membership plan: {0}")]
    UnknownPlan(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_plan_codes_roundtrip() {
        for plan in [MembershipPlan::DropIn, MembershipPlan::Monthly, MembershipPlan::Quarterly] {
            assert_eq!(plan.code().parse::<MembershipPlan>().unwrap(), plan);
        }
        assert!("yearly".parse::<MembershipPlan>().is_err());
    }

    #[test]
    fn test_plan_validity() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();

        let (_, end) = MembershipPlan::DropIn.validity(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap());

        let (_, end) = MembershipPlan::Monthly.validity(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap());

        let (_, end) = MembershipPlan::Quarterly.validity(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 30, 9, 0, 0).unwrap());

        assert_eq!(MembershipPlan::Monthly.credits(), None);
        assert_eq!(MembershipPlan::DropIn.credits(), Some(1));
    }
}
