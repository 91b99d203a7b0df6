mod add_on;
mod booking;
mod provider;
mod provider_day;
mod schedule;
mod service;
mod shop;

use eventstore::ResolvedEvent;

use crate::domain::{
    core::{AddOn, Booking, CoreEvent, Provider, ProviderDay, Schedule, Service, Shop},
    Entity,
};

pub use self::add_on::*;
pub use self::booking::*;
pub use self::provider::*;
pub use self::provider_day::*;
pub use self::schedule::*;
pub use self::service::*;
pub use self::shop::*;

use super::EventConvertError;

impl TryFrom<&ResolvedEvent> for CoreEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        let prefix = value
            .get_original_stream_id()
            .rsplit_once('-')
            .map(|(prefix, _)| prefix)
            .ok_or(EventConvertError)?;
        match prefix {
            AddOn::ENTITY_NAME => Ok(CoreEvent::AddOnEvent(TryFrom::try_from(value)?)),
            Booking::ENTITY_NAME => Ok(CoreEvent::BookingEvent(TryFrom::try_from(value)?)),
            Provider::ENTITY_NAME => Ok(CoreEvent::ProviderEvent(TryFrom::try_from(value)?)),
            ProviderDay::ENTITY_NAME => Ok(CoreEvent::ProviderDayEvent(TryFrom::try_from(value)?)),
            Schedule::ENTITY_NAME => Ok(CoreEvent::ScheduleEvent(TryFrom::try_from(value)?)),
            Service::ENTITY_NAME => Ok(CoreEvent::ServiceEvent(TryFrom::try_from(value)?)),
            Shop::ENTITY_NAME => Ok(CoreEvent::ShopEvent(TryFrom::try_from(value)?)),
            _ => Err(EventConvertError),
        }
    }
}
