use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{AddOnId, ProviderId, ServiceId, ShopId};

/// Booking repository
#[async_trait]
pub trait BookingRepository {
    /// Find a booking by id
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError>;
    /// Save a booking
    async fn save(&self, entity: &mut Booking) -> Result<bool, DataAccessError>;
    /// Delete a booking
    async fn delete(&self, entity: &mut Booking) -> Result<bool, DataAccessError>;
}

/// Booking id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct BookingId(u64);

impl Id for BookingId {
    type Inner = u64;
}

/// Booking events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    /// A booking was taken, pending confirmation
    BookingCreated {
        id: BookingId,
        shop_id: ShopId,
        service_id: ServiceId,
        add_on_ids: Vec<AddOnId>,
        provider_id: ProviderId,
        customer: BookingCustomer,
        time: Range<DateTime<Utc>>,
    },
    /// The shop confirmed the booking
    BookingConfirmed { id: BookingId },
    /// The appointment happened
    BookingCompleted { id: BookingId },
    /// The booking was called off
    BookingCancelled { id: BookingId },
    /// The customer never showed up
    MarkedNoShow { id: BookingId, at: DateTime<Utc> },
}

impl Event for BookingEvent {
    type Id = BookingId;
}

/// Booking entity
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    shop_id: ShopId,
    service_id: ServiceId,
    add_on_ids: Vec<AddOnId>,
    provider_id: ProviderId,
    customer: BookingCustomer,
    time: Range<DateTime<Utc>>,
    status: BookingStatus,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<BookingEvent>,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: BookingId,
        shop_id: ShopId,
        service_id: ServiceId,
        add_on_ids: Vec<AddOnId>,
        provider_id: ProviderId,
        customer: BookingCustomer,
        time: Range<DateTime<Utc>>,
    ) -> Result<Self, BookingError> {
        Self::validate_time(&time)?;
        customer.validate()?;
        let mut entity = Booking {
            id,
            shop_id,
            service_id,
            add_on_ids: add_on_ids.clone(),
            provider_id,
            customer: customer.clone(),
            time: time.clone(),
            status: BookingStatus::Pending,
            ..Booking::default()
        };
        entity.events.push(BookingEvent::BookingCreated {
            id,
            shop_id,
            service_id,
            add_on_ids,
            provider_id,
            customer,
            time,
        });
        Ok(entity)
    }

    pub fn confirm(&mut self) -> Result<(), BookingError> {
        self.validate_transition(BookingStatus::Confirmed, None)?;
        self.status = BookingStatus::Confirmed;
        self.events
            .push(BookingEvent::BookingConfirmed { id: self.id });
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), BookingError> {
        self.validate_transition(BookingStatus::Completed, None)?;
        self.status = BookingStatus::Completed;
        self.events
            .push(BookingEvent::BookingCompleted { id: self.id });
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), BookingError> {
        self.validate_transition(BookingStatus::Cancelled, None)?;
        self.status = BookingStatus::Cancelled;
        self.events
            .push(BookingEvent::BookingCancelled { id: self.id });
        Ok(())
    }

    pub fn mark_no_show(&mut self, at: DateTime<Utc>) -> Result<(), BookingError> {
        self.validate_transition(BookingStatus::NoShow, Some(at))?;
        self.status = BookingStatus::NoShow;
        self.events
            .push(BookingEvent::MarkedNoShow { id: self.id, at });
        Ok(())
    }

    pub fn shop_id(&self) -> ShopId {
        self.shop_id
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn add_on_ids(&self) -> &[AddOnId] {
        &self.add_on_ids
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    pub fn customer(&self) -> &BookingCustomer {
        &self.customer
    }

    pub fn time(&self) -> &Range<DateTime<Utc>> {
        &self.time
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    /// Whether the appointment still holds the provider's time.
    pub fn holds_slot(&self) -> bool {
        matches!(
            self.status,
            BookingStatus::Pending | BookingStatus::Confirmed
        )
    }

    fn validate_id(&self, id: &BookingId) -> Result<(), BookingError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(BookingError::MismatchedId),
        }
    }

    fn validate_time(time: &Range<DateTime<Utc>>) -> Result<(), BookingError> {
        match time.start < time.end {
            true => Ok(()),
            false => Err(BookingError::InvalidTime),
        }
    }

    fn validate_transition(
        &self,
        to: BookingStatus,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), BookingError> {
        let allowed = match (self.status, to) {
            (BookingStatus::Pending, BookingStatus::Confirmed) => true,
            (BookingStatus::Confirmed, BookingStatus::Completed) => true,
            (BookingStatus::Pending | BookingStatus::Confirmed, BookingStatus::Cancelled) => true,
            // A no-show can only be called once the appointment has ended.
            (BookingStatus::Confirmed, BookingStatus::NoShow) => {
                at.map(|at| at >= self.time.end).unwrap_or(false)
            }
            _ => false,
        };
        match allowed {
            true => Ok(()),
            false => Err(BookingError::InvalidTransition {
                from: self.status,
                to,
            }),
        }
    }
}

impl Entity for Booking {
    type Id = BookingId;

    const ENTITY_NAME: &'static str = "booking";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Booking {
    type Event = BookingEvent;
    type Error = BookingError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            BookingEvent::BookingCreated { time, customer, .. } => {
                Self::validate_time(time)?;
                customer.validate()
            }
            BookingEvent::BookingConfirmed { id } => {
                self.validate_id(id)?;
                self.validate_transition(BookingStatus::Confirmed, None)
            }
            BookingEvent::BookingCompleted { id } => {
                self.validate_id(id)?;
                self.validate_transition(BookingStatus::Completed, None)
            }
            BookingEvent::BookingCancelled { id } => {
                self.validate_id(id)?;
                self.validate_transition(BookingStatus::Cancelled, None)
            }
            BookingEvent::MarkedNoShow { id, at } => {
                self.validate_id(id)?;
                self.validate_transition(BookingStatus::NoShow, Some(*at))
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            BookingEvent::BookingCreated {
                id,
                shop_id,
                service_id,
                add_on_ids,
                provider_id,
                customer,
                time,
            } => {
                if self.id != id {
                    if let Ok(entity) = Self::create(
                        id,
                        shop_id,
                        service_id,
                        add_on_ids,
                        provider_id,
                        customer,
                        time,
                    ) {
                        *self = entity;
                    }
                }
            }
            BookingEvent::BookingConfirmed { id } => {
                if self.id == id {
                    if let Err(_e) = self.confirm() {}
                }
            }
            BookingEvent::BookingCompleted { id } => {
                if self.id == id {
                    if let Err(_e) = self.complete() {}
                }
            }
            BookingEvent::BookingCancelled { id } => {
                if self.id == id {
                    if let Err(_e) = self.cancel() {}
                }
            }
            BookingEvent::MarkedNoShow { id, at } => {
                if self.id == id {
                    if let Err(_e) = self.mark_no_show(at) {}
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

impl PartialEq for Booking {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.shop_id == other.shop_id
            && self.service_id == other.service_id
            && self.add_on_ids == other.add_on_ids
            && self.provider_id == other.provider_id
            && self.customer == other.customer
            && self.time == other.time
            && self.status == other.status
    }
}

impl Eq for Booking {}

/// Booking errors
#[derive(Error, Display, Debug)]
pub enum BookingError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Start must come before end")]
    InvalidTime,
    #[display(fmt = "Walk-in customers need a name")]
    CustomerNameIsBlank,
    #[display(fmt = "Cannot go from {} to {}", from, to)]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
}

/// Booking lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
pub enum BookingStatus {
    #[default]
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "confirmed")]
    Confirmed,
    #[display(fmt = "completed")]
    Completed,
    #[display(fmt = "cancelled")]
    Cancelled,
    #[display(fmt = "no_show")]
    NoShow,
}

/// Who the appointment is for. Front desks take bookings over the phone for
/// people without an account, so a bare name and phone number is enough.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingCustomer {
    Registered { customer_id: CustomerId },
    WalkIn { name: String, phone: String },
}

impl BookingCustomer {
    pub fn validate(&self) -> Result<(), BookingError> {
        match self {
            BookingCustomer::Registered { .. } => Ok(()),
            BookingCustomer::WalkIn { name, .. } => match name.trim().is_empty() {
                true => Err(BookingError::CustomerNameIsBlank),
                false => Ok(()),
            },
        }
    }
}

impl Default for BookingCustomer {
    fn default() -> Self {
        BookingCustomer::Registered {
            customer_id: CustomerId::default(),
        }
    }
}

/// Customer id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct CustomerId(u64);

impl Id for CustomerId {
    type Inner = u64;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn booking() -> Booking {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap();
        Booking::create(
            BookingId(1),
            ShopId::from(1),
            ServiceId::from(10),
            vec![],
            ProviderId::from(3),
            BookingCustomer::WalkIn {
                name: "Sam".to_owned(),
                phone: "555-0100".to_owned(),
            },
            start..end,
        )
        .unwrap()
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut b = booking();
        assert_eq!(b.status(), BookingStatus::Pending);
        b.confirm().unwrap();
        b.complete().unwrap();
        assert_eq!(b.status(), BookingStatus::Completed);
        assert!(!b.holds_slot());
    }

    #[test]
    fn test_complete_before_confirm_rejected() {
        let mut b = booking();
        assert!(matches!(
            b.complete(),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_from_pending_and_confirmed() {
        let mut b = booking();
        b.cancel().unwrap();
        assert!(b.cancel().is_err());

        let mut b = booking();
        b.confirm().unwrap();
        b.cancel().unwrap();
        assert_eq!(b.status(), BookingStatus::Cancelled);
    }

    #[test]
    fn test_no_show_only_after_end() {
        let mut b = booking();
        b.confirm().unwrap();
        let during = Utc.with_ymd_and_hms(2026, 6, 1, 14, 15, 0).unwrap();
        assert!(b.mark_no_show(during).is_err());
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 15, 0, 0).unwrap();
        b.mark_no_show(after).unwrap();
        assert_eq!(b.status(), BookingStatus::NoShow);
    }

    #[test]
    fn test_no_show_requires_confirmed() {
        let mut b = booking();
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 15, 0, 0).unwrap();
        assert!(b.mark_no_show(after).is_err());
    }

    #[test]
    fn test_registered_customer_accepted() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap();
        let b = Booking::create(
            BookingId(1),
            ShopId::from(1),
            ServiceId::from(10),
            vec![],
            ProviderId::from(3),
            BookingCustomer::Registered {
                customer_id: CustomerId::from(9),
            },
            start..end,
        )
        .unwrap();
        assert!(matches!(
            b.customer(),
            BookingCustomer::Registered { customer_id } if *customer_id == CustomerId::from(9)
        ));
    }

    #[test]
    fn test_walk_in_blank_name_rejected() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap();
        assert!(Booking::create(
            BookingId(1),
            ShopId::from(1),
            ServiceId::from(10),
            vec![],
            ProviderId::from(3),
            BookingCustomer::WalkIn {
                name: " ".to_owned(),
                phone: String::new(),
            },
            start..end,
        )
        .is_err());
    }
}
