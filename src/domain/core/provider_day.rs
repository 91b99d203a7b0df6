use std::fmt::{self, Display};
use std::ops::Range;
use std::str::FromStr;

use async_trait::async_trait;
use bio::data_structures::interval_tree::IntervalTree;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{BookingId, ProviderId};

/// Provider-day repository
#[async_trait]
pub trait ProviderDayRepository {
    /// Find a provider's ledger for one local date
    async fn find_by_id(&self, id: ProviderDayId) -> Result<Option<ProviderDay>, DataAccessError>;
    /// Save the ledger. The append is conditional on the revision the ledger
    /// was loaded at, so two writers racing on the same day cannot both win.
    async fn save(&self, entity: &mut ProviderDay) -> Result<bool, DataAccessError>;
    /// Delete the ledger
    async fn delete(&self, entity: &mut ProviderDay) -> Result<bool, DataAccessError>;
}

/// One provider on one local calendar date.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub provider: ProviderId,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(provider: ProviderId, date: NaiveDate) -> Self {
        Self { provider, date }
    }
}

impl Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider, self.date.format("%Y%m%d"))
    }
}

impl FromStr for DayKey {
    type Err = ParseDayKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, date) = s.split_once('.').ok_or(ParseDayKeyError)?;
        let provider = provider
            .parse::<u64>()
            .map(ProviderId::from)
            .map_err(|_| ParseDayKeyError)?;
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| ParseDayKeyError)?;
        Ok(Self { provider, date })
    }
}

#[derive(Error, Display, Debug)]
#[display(fmt = "Expected <provider>.<yyyymmdd>")]
pub struct ParseDayKeyError;

/// Provider-day id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref,
)]
pub struct ProviderDayId(DayKey);

impl Id for ProviderDayId {
    type Inner = DayKey;
}

impl Default for ProviderDayId {
    fn default() -> Self {
        Self(DayKey::new(ProviderId::default(), NaiveDate::default()))
    }
}

/// Provider-day events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderDayEvent {
    /// The ledger for the day was started
    DayOpened { id: ProviderDayId },
    /// A slice of the provider's day was claimed by a booking
    IntervalReserved {
        id: ProviderDayId,
        interval: ReservedInterval,
    },
    /// A claim was given back, the booking was cancelled
    IntervalReleased {
        id: ProviderDayId,
        booking_id: BookingId,
    },
}

impl Event for ProviderDayEvent {
    type Id = ProviderDayId;
}

/// A slice of a provider's time held by a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedInterval {
    pub booking_id: BookingId,
    pub time: Range<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

/// Per-provider, per-date reservation ledger. All claims on a provider's time
/// go through this single aggregate, so an optimistic append is enough to
/// serialize competing bookings for the same slot.
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct ProviderDay {
    id: ProviderDayId,
    reserved: Vec<ReservedInterval>,
    #[serde(skip)]
    revision: Option<u64>,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<ProviderDayEvent>,
}

impl ProviderDay {
    pub fn open(id: ProviderDayId) -> Self {
        let mut entity = ProviderDay {
            id,
            ..ProviderDay::default()
        };
        entity.events.push(ProviderDayEvent::DayOpened { id });
        entity
    }

    pub fn reserve(&mut self, interval: ReservedInterval) -> Result<(), ProviderDayError> {
        self.validate_reserve(&interval)?;
        self.reserved.push(interval.clone());
        self.events.push(ProviderDayEvent::IntervalReserved {
            id: self.id,
            interval,
        });
        Ok(())
    }

    pub fn release(&mut self, booking_id: BookingId) -> Result<(), ProviderDayError> {
        self.validate_release(&booking_id)?;
        self.reserved.retain(|r| r.booking_id != booking_id);
        self.events.push(ProviderDayEvent::IntervalReleased {
            id: self.id,
            booking_id,
        });
        Ok(())
    }

    pub fn reserved(&self) -> &[ReservedInterval] {
        &self.reserved
    }

    pub fn find_by_key(&self, idempotency_key: &str) -> Option<&ReservedInterval> {
        self.reserved
            .iter()
            .find(|r| r.idempotency_key.as_deref() == Some(idempotency_key))
    }

    /// Stream revision the ledger was loaded at, None for a fresh day.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn set_revision(&mut self, revision: u64) {
        self.revision = Some(revision);
    }

    fn validate_id(&self, id: &ProviderDayId) -> Result<(), ProviderDayError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ProviderDayError::MismatchedId),
        }
    }

    fn validate_reserve(&self, interval: &ReservedInterval) -> Result<(), ProviderDayError> {
        if interval.time.start >= interval.time.end {
            return Err(ProviderDayError::InvalidInterval);
        }
        if self
            .reserved
            .iter()
            .any(|r| r.booking_id == interval.booking_id)
        {
            return Err(ProviderDayError::DuplicateBooking);
        }
        match IntervalTree::from_iter(self.reserved.iter().map(|r| (&r.time, r)))
            .find(&interval.time)
            .next()
        {
            Some(_) => Err(ProviderDayError::OverlappingInterval),
            None => Ok(()),
        }
    }

    fn validate_release(&self, booking_id: &BookingId) -> Result<(), ProviderDayError> {
        match self.reserved.iter().any(|r| r.booking_id == *booking_id) {
            true => Ok(()),
            false => Err(ProviderDayError::IntervalNotFound),
        }
    }
}

impl Entity for ProviderDay {
    type Id = ProviderDayId;

    const ENTITY_NAME: &'static str = "provider_day";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for ProviderDay {
    type Event = ProviderDayEvent;
    type Error = ProviderDayError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ProviderDayEvent::DayOpened { .. } => Ok(()),
            ProviderDayEvent::IntervalReserved { id, interval } => {
                self.validate_id(id)?;
                self.validate_reserve(interval)
            }
            ProviderDayEvent::IntervalReleased { id, booking_id } => {
                self.validate_id(id)?;
                self.validate_release(booking_id)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ProviderDayEvent::DayOpened { id } => {
                if self.id != id {
                    *self = Self::open(id);
                }
            }
            ProviderDayEvent::IntervalReserved { id, interval } => {
                if self.id == id {
                    if let Err(_e) = self.reserve(interval) {}
                }
            }
            ProviderDayEvent::IntervalReleased { id, booking_id } => {
                if self.id == id {
                    if let Err(_e) = self.release(booking_id) {}
                }
            }
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for ProviderDay {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.reserved == other.reserved
    }
}

impl Eq for ProviderDay {}

/// Provider-day errors
#[derive(Error, Display, Debug)]
pub enum ProviderDayError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Start must come before end")]
    InvalidInterval,
    #[display(fmt = "The booking already holds an interval that day")]
    DuplicateBooking,
    #[display(fmt = "The interval overlaps an existing reservation")]
    OverlappingInterval,
    #[display(fmt = "No interval held by that booking")]
    IntervalNotFound,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn day() -> ProviderDay {
        let key = DayKey::new(
            ProviderId::from(3),
            NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        );
        ProviderDay::open(ProviderDayId::from(key))
    }

    fn interval(booking: u64, start_min: u32, end_min: u32) -> ReservedInterval {
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        ReservedInterval {
            booking_id: BookingId::from(booking),
            time: base + chrono::Duration::minutes(start_min as i64)
                ..base + chrono::Duration::minutes(end_min as i64),
            idempotency_key: None,
        }
    }

    #[test]
    fn test_overlap_rejected() {
        let mut d = day();
        d.reserve(interval(1, 600, 630)).unwrap();
        assert!(matches!(
            d.reserve(interval(2, 615, 645)),
            Err(ProviderDayError::OverlappingInterval)
        ));
        // Back to back is fine.
        d.reserve(interval(3, 630, 660)).unwrap();
    }

    #[test]
    fn test_release_frees_the_slot() {
        let mut d = day();
        d.reserve(interval(1, 600, 630)).unwrap();
        d.release(BookingId::from(1)).unwrap();
        d.reserve(interval(2, 600, 630)).unwrap();
        assert!(matches!(
            d.release(BookingId::from(1)),
            Err(ProviderDayError::IntervalNotFound)
        ));
    }

    #[test]
    fn test_idempotency_key_lookup() {
        let mut d = day();
        let mut i = interval(1, 600, 630);
        i.idempotency_key = Some("req-abc".to_owned());
        d.reserve(i).unwrap();
        assert_eq!(
            d.find_by_key("req-abc").map(|r| r.booking_id),
            Some(BookingId::from(1))
        );
        assert!(d.find_by_key("req-xyz").is_none());
    }

    #[test]
    fn test_day_key_round_trip() {
        let key = DayKey::new(
            ProviderId::from(123),
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
        );
        assert_eq!(key.to_string(), "123.20260308");
        assert_eq!("123.20260308".parse::<DayKey>().unwrap(), key);
        assert!("123".parse::<DayKey>().is_err());
        assert!("x.20260308".parse::<DayKey>().is_err());
    }

    proptest! {
        // Whatever mix of requests arrives, the accepted set never holds two
        // overlapping intervals.
        #[test]
        fn test_accepted_intervals_never_overlap(
            requests in prop::collection::vec((0u64..50, 0u32..1410), 1..40)
        ) {
            let mut d = day();
            for (i, (booking, start)) in requests.into_iter().enumerate() {
                let _ = d.reserve(interval(booking * 100 + i as u64, start, start + 30));
            }
            let accepted = d.reserved();
            for a in accepted {
                for b in accepted {
                    if a.booking_id != b.booking_id {
                        prop_assert!(a.time.end <= b.time.start || b.time.end <= a.time.start);
                    }
                }
            }
        }
    }
}
