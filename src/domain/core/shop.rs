use async_trait::async_trait;
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{ProviderId, ScheduleId, TimezoneId};

/// Shop repository
#[async_trait]
pub trait ShopRepository {
    /// Find a shop by id
    async fn find_by_id(&self, id: ShopId) -> Result<Option<Shop>, DataAccessError>;
    /// Save a shop
    async fn save(&self, entity: &mut Shop) -> Result<bool, DataAccessError>;
    /// Delete a shop
    async fn delete(&self, entity: &mut Shop) -> Result<bool, DataAccessError>;
}

/// Shop id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct ShopId(u64);

impl Id for ShopId {
    type Inner = u64;
}

/// Shop events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShopEvent {
    /// A shop opened for business
    ShopOpened {
        id: ShopId,
        name: String,
        timezone: TimezoneId,
    },
    /// The shop was renamed
    ShopRenamed { id: ShopId, name: String },
    /// The shop timezone changed
    TimezoneChanged { id: ShopId, timezone: TimezoneId },
    /// Default opening-hours schedule attached
    ScheduleAttached { id: ShopId, schedule_id: ScheduleId },
    /// A provider was enrolled at the shop
    ProviderEnrolled { id: ShopId, provider_id: ProviderId },
    /// A provider was dropped from the shop
    ProviderDropped { id: ShopId, provider_id: ProviderId },
    /// The shop closed permanently
    ShopDeleted { id: ShopId },
}

impl Event for ShopEvent {
    type Id = ShopId;
}

/// Shop entity
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct Shop {
    id: ShopId,
    name: String,
    timezone: TimezoneId,
    schedule_id: Option<ScheduleId>,
    provider_ids: Vec<ProviderId>,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<ShopEvent>,
}

impl Shop {
    pub fn open(id: ShopId, name: String, timezone: TimezoneId) -> Result<Self, ShopError> {
        Self::validate_name(&name)?;
        let mut entity = Shop {
            id,
            name: name.clone(),
            timezone,
            ..Shop::default()
        };
        entity.events.push(ShopEvent::ShopOpened { id, name, timezone });
        Ok(entity)
    }

    pub fn rename(&mut self, name: String) -> Result<(), ShopError> {
        Self::validate_name(&name)?;
        self.name = name.clone();
        self.events.push(ShopEvent::ShopRenamed { id: self.id, name });
        Ok(())
    }

    pub fn change_timezone(&mut self, timezone: TimezoneId) {
        self.timezone = timezone;
        self.events.push(ShopEvent::TimezoneChanged {
            id: self.id,
            timezone,
        });
    }

    pub fn attach_schedule(&mut self, schedule_id: ScheduleId) {
        self.schedule_id = Some(schedule_id);
        self.events.push(ShopEvent::ScheduleAttached {
            id: self.id,
            schedule_id,
        });
    }

    pub fn enroll_provider(&mut self, provider_id: ProviderId) -> Result<(), ShopError> {
        self.validate_provider_enrolled(&provider_id)?;
        self.provider_ids.push(provider_id);
        self.events.push(ShopEvent::ProviderEnrolled {
            id: self.id,
            provider_id,
        });
        Ok(())
    }

    pub fn drop_provider(&mut self, provider_id: ProviderId) -> Result<(), ShopError> {
        self.validate_provider_dropped(&provider_id)?;
        self.provider_ids.retain(|p| *p != provider_id);
        self.events.push(ShopEvent::ProviderDropped {
            id: self.id,
            provider_id,
        });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timezone(&self) -> TimezoneId {
        self.timezone
    }

    pub fn schedule_id(&self) -> Option<ScheduleId> {
        self.schedule_id
    }

    pub fn provider_ids(&self) -> &[ProviderId] {
        &self.provider_ids
    }

    fn validate_id(&self, id: &ShopId) -> Result<(), ShopError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ShopError::MismatchedId),
        }
    }

    fn validate_name(name: &str) -> Result<(), ShopError> {
        match name.trim().is_empty() {
            true => Err(ShopError::NameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_provider_enrolled(&self, provider_id: &ProviderId) -> Result<(), ShopError> {
        match self.provider_ids.contains(provider_id) {
            true => Err(ShopError::DuplicateProvider),
            false => Ok(()),
        }
    }

    fn validate_provider_dropped(&self, provider_id: &ProviderId) -> Result<(), ShopError> {
        match self.provider_ids.contains(provider_id) {
            true => Ok(()),
            false => Err(ShopError::ProviderNotFound),
        }
    }
}

impl Entity for Shop {
    type Id = ShopId;

    const ENTITY_NAME: &'static str = "shop";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Shop {
    type Event = ShopEvent;
    type Error = ShopError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ShopEvent::ShopOpened { name, .. } => Self::validate_name(name),
            ShopEvent::ShopRenamed { id, name } => {
                self.validate_id(id)?;
                Self::validate_name(name)
            }
            ShopEvent::TimezoneChanged { id, .. } | ShopEvent::ScheduleAttached { id, .. } => {
                self.validate_id(id)
            }
            ShopEvent::ProviderEnrolled { id, provider_id } => {
                self.validate_id(id)?;
                self.validate_provider_enrolled(provider_id)
            }
            ShopEvent::ProviderDropped { id, provider_id } => {
                self.validate_id(id)?;
                self.validate_provider_dropped(provider_id)
            }
            ShopEvent::ShopDeleted { id } => self.validate_id(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ShopEvent::ShopOpened { id, name, timezone } => {
                if self.id != id {
                    if let Ok(entity) = Self::open(id, name, timezone) {
                        *self = entity;
                    }
                }
            }
            ShopEvent::ShopRenamed { id, name } => {
                if self.id == id {
                    if let Err(_e) = self.rename(name) {}
                }
            }
            ShopEvent::TimezoneChanged { id, timezone } => {
                if self.id == id {
                    self.change_timezone(timezone);
                }
            }
            ShopEvent::ScheduleAttached { id, schedule_id } => {
                if self.id == id {
                    self.attach_schedule(schedule_id);
                }
            }
            ShopEvent::ProviderEnrolled { id, provider_id } => {
                if self.id == id {
                    if let Err(_e) = self.enroll_provider(provider_id) {}
                }
            }
            ShopEvent::ProviderDropped { id, provider_id } => {
                if self.id == id {
                    if let Err(_e) = self.drop_provider(provider_id) {}
                }
            }
            ShopEvent::ShopDeleted { .. } => {}
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Shop {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.timezone == other.timezone
            && self.schedule_id == other.schedule_id
            && self.provider_ids == other.provider_ids
    }
}

impl Eq for Shop {}

/// Shop errors
#[derive(Error, Display, Debug)]
pub enum ShopError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
    #[display(fmt = "Provider is already enrolled")]
    DuplicateProvider,
    #[display(fmt = "Provider is not enrolled at this shop")]
    ProviderNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shop_open() {
        let shop = Shop::open(
            ShopId(1),
            "Bob's Barbershop".to_owned(),
            "America/New_York".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(shop.id(), ShopId(1));
        assert_eq!(shop.name(), "Bob's Barbershop");
        assert!(shop.schedule_id().is_none());
    }

    #[test]
    fn test_shop_blank_name_rejected() {
        assert!(Shop::open(ShopId(1), "  ".to_owned(), TimezoneId::default()).is_err());
    }

    #[test]
    fn test_enroll_provider_twice_rejected() {
        let mut shop = Shop::open(
            ShopId(1),
            "Ink & Iron".to_owned(),
            "America/Chicago".parse().unwrap(),
        )
        .unwrap();
        shop.enroll_provider(ProviderId::from(7)).unwrap();
        assert!(matches!(
            shop.enroll_provider(ProviderId::from(7)),
            Err(ShopError::DuplicateProvider)
        ));
    }
}
