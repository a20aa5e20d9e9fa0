use chrono::{Days, NaiveDate, NaiveTime};

/// Days ahead a session can be booked, today included
pub const BOOKING_WINDOW_DAYS: u64 = 14;

const SLOTS: [(u32, u32); 10] = [
    (9, 0),
    (9, 30),
    (10, 0),
    (10, 30),
    (11, 0),
    (14, 0),
    (14, 30),
    (15, 0),
    (15, 30),
    (16, 0),
];

/// Bookable dates starting at `today`
pub fn available_dates(today: NaiveDate, window_days: u64) -> Vec<NaiveDate> {
    (0..window_days)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .collect()
}

pub fn is_available_date(date: NaiveDate, today: NaiveDate, window_days: u64) -> bool {
    match today.checked_add_days(Days::new(window_days)) {
        Some(end) => date >= today && date < end,
        None => date >= today,
    }
}

pub fn time_slots() -> Vec<NaiveTime> {
    SLOTS
        .iter()
        .filter_map(|&(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0))
        .collect()
}

pub fn is_available_time(time: NaiveTime) -> bool {
    time_slots().contains(&time)
}
