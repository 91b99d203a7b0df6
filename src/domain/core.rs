mod add_on;
mod booking;
mod provider;
mod provider_day;
mod schedule;
mod service;
mod shop;

use std::fmt::Display;
use std::str::FromStr;

use chrono_tz::Tz;
use num_format::{Locale, ToFormattedString};
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DisplayFromStr;

pub use self::add_on::*;
pub use self::booking::*;
pub use self::provider::*;
pub use self::provider_day::*;
pub use self::schedule::*;
pub use self::service::*;
pub use self::shop::*;

#[derive(Clone, Debug)]
pub enum CoreEvent {
    ShopEvent(ShopEvent),
    ScheduleEvent(ScheduleEvent),
    ProviderEvent(ProviderEvent),
    ServiceEvent(ServiceEvent),
    AddOnEvent(AddOnEvent),
    BookingEvent(BookingEvent),
    ProviderDayEvent(ProviderDayEvent),
}

/// Validated IANA timezone identifier.
#[serde_as]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneId(#[serde_as(as = "DisplayFromStr")] Tz);

impl TimezoneId {
    pub fn tz(&self) -> Tz {
        self.0
    }
}

impl From<Tz> for TimezoneId {
    fn from(value: Tz) -> Self {
        Self(value)
    }
}

impl FromStr for TimezoneId {
    type Err = <Tz as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s).map(TimezoneId::from)
    }
}

impl Display for TimezoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for TimezoneId {
    fn default() -> Self {
        Self(Tz::UTC)
    }
}

/// Amount of money in the smallest unit of the currency.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Money {
    amount: u64,
    currency: Currency,
}

impl Money {
    pub fn new(amount: u64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn add(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        self.amount
            .checked_add(other.amount)
            .map(|amount| Money::new(amount, self.currency))
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            self.currency.symbol(),
            self.amount.to_formatted_string(&Locale::en)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    USD,
    JPY,
    EUR,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::JPY => "¥",
            Currency::EUR => "€",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        let price = Money::new(1000000, Currency::USD);
        assert_eq!(format!("{}", price), "$1,000,000");
    }

    #[test]
    fn test_money_add_mismatched_currency() {
        let a = Money::new(100, Currency::USD);
        let b = Money::new(100, Currency::JPY);
        assert_eq!(a.add(&b), None);
    }

    #[test]
    fn test_money_add_overflow() {
        let a = Money::new(u64::MAX, Currency::USD);
        let b = Money::new(1, Currency::USD);
        assert_eq!(a.add(&b), None);
    }

    #[test]
    fn test_timezone_id_round_trip() {
        let tz: TimezoneId = "America/New_York".parse().unwrap();
        assert_eq!(tz.to_string(), "America/New_York");
        assert!("Not/AZone".parse::<TimezoneId>().is_err());
    }
}
