use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the payer has entered so far. Lives exactly as long as one opening of the
/// wizard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingDraft {
    pub id: Uuid,
    pub service_id: Option<String>,
    pub selected_date: Option<NaiveDate>,
    pub selected_time: Option<NaiveTime>,
    pub reason: String,
    pub concerns: String,
    pub special_requests: String,
    pub agree_to_terms: bool,
}

impl BookingDraft {
    pub fn new(pre_selected_service: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id: pre_selected_service.map(str::to_string),
            selected_date: None,
            selected_time: None,
            reason: String::new(),
            concerns: String::new(),
            special_requests: String::new(),
            agree_to_terms: false,
        }
    }

    pub fn has_schedule(&self) -> bool {
        self.selected_date.is_some() && self.selected_time.is_some()
    }

    /// Length in characters, not bytes
    pub fn reason_len(&self) -> usize {
        self.reason.chars().count()
    }
}
