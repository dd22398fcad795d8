//! Subscription records and entitlement windows

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingError;

/// Lifecycle of a subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    /// Superseded by a later approved purchase
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            other => Err(BillingError::Database(format!(
                "Unknown subscription status '{}'",
                other
            ))),
        }
    }
}

/// A tenant's entitlement over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub start_date: Date,
    pub end_date: Date,
    /// Resource footprint exceeded the plan when it was activated
    pub pending_unlock: bool,
    pub created_at: OffsetDateTime,
}

impl Subscription {
    /// Whether the window still covers `today` (end date inclusive)
    pub fn is_current(&self, today: Date) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date >= today
    }
}

/// Values for a subscription about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub owner_id: Uuid,
    pub plan: String,
    pub start_date: Date,
    pub end_date: Date,
    pub pending_unlock: bool,
}

/// Add calendar months to a date, clamping the day to the end of the target month
pub fn add_months(date: Date, months: u8) -> Date {
    let zero_based = i32::from(u8::from(date.month())) - 1 + i32::from(months);
    let year = date.year() + zero_based / 12;
    let month = Month::try_from((zero_based % 12 + 1) as u8).unwrap_or(Month::December);
    let day = date.day().min(time::util::days_in_year_month(year, month));

    Date::from_calendar_date(year, month, day).unwrap_or(date)
}

/// Window `[today, today + months]` for a newly approved purchase
pub fn entitlement_window(today: Date, months: u8) -> (Date, Date) {
    (today, add_months(today, months))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_add_months_simple() {
        assert_eq!(add_months(date!(2024 - 01 - 15), 1), date!(2024 - 02 - 15));
        assert_eq!(add_months(date!(2024 - 03 - 10), 3), date!(2024 - 06 - 10));
    }

    #[test]
    fn test_add_months_crosses_year() {
        assert_eq!(add_months(date!(2024 - 11 - 30), 3), date!(2025 - 02 - 28));
        assert_eq!(add_months(date!(2024 - 07 - 01), 12), date!(2025 - 07 - 01));
        assert_eq!(add_months(date!(2024 - 12 - 05), 1), date!(2025 - 01 - 05));
    }

    #[test]
    fn test_add_months_clamps_day() {
        assert_eq!(add_months(date!(2024 - 01 - 31), 1), date!(2024 - 02 - 29));
        assert_eq!(add_months(date!(2023 - 01 - 31), 1), date!(2023 - 02 - 28));
        assert_eq!(add_months(date!(2024 - 08 - 31), 6), date!(2025 - 02 - 28));
    }

    #[test]
    fn test_is_current_end_inclusive() {
        let sub = Subscription {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            plan: "basico".to_string(),
            status: SubscriptionStatus::Active,
            start_date: date!(2024 - 01 - 01),
            end_date: date!(2024 - 02 - 01),
            pending_unlock: false,
            created_at: OffsetDateTime::now_utc(),
        };
        assert!(sub.is_current(date!(2024 - 02 - 01)));
        assert!(!sub.is_current(date!(2024 - 02 - 02)));

        let superseded = Subscription {
            status: SubscriptionStatus::Inactive,
            ..sub
        };
        assert!(!superseded.is_current(date!(2024 - 01 - 15)));
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!(
            "inactive".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Inactive
        );
        assert!("cancelled".parse::<SubscriptionStatus>().is_err());
    }
}
