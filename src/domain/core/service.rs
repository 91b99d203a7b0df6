use async_trait::async_trait;
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{Money, ShopId};

/// Service repository
#[async_trait]
pub trait ServiceRepository {
    /// Find a service by id
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError>;
    /// Save a service
    async fn save(&self, entity: &mut Service) -> Result<bool, DataAccessError>;
    /// Delete a service
    async fn delete(&self, entity: &mut Service) -> Result<bool, DataAccessError>;
}

/// Service id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct ServiceId(u64);

impl Id for ServiceId {
    type Inner = u64;
}

/// Service events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceEvent {
    /// A service was put on the menu
    ServiceListed {
        id: ServiceId,
        shop_id: ShopId,
        name: String,
        description: String,
        duration_minutes: u32,
        price: Money,
    },
    /// Name or description changed
    ServiceDescribed {
        id: ServiceId,
        name: String,
        description: String,
    },
    /// The appointment length changed
    DurationChanged { id: ServiceId, duration_minutes: u32 },
    /// The price changed
    PriceChanged { id: ServiceId, price: Money },
    /// The service was taken off the menu
    ServiceDelisted { id: ServiceId },
}

impl Event for ServiceEvent {
    type Id = ServiceId;
}

/// A bookable service on a shop's menu.
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct Service {
    id: ServiceId,
    shop_id: ShopId,
    name: String,
    description: String,
    duration_minutes: u32,
    price: Money,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<ServiceEvent>,
}

impl Service {
    pub fn list(
        id: ServiceId,
        shop_id: ShopId,
        name: String,
        description: String,
        duration_minutes: u32,
        price: Money,
    ) -> Result<Self, ServiceError> {
        Self::validate_name(&name)?;
        Self::validate_duration(duration_minutes)?;
        let mut entity = Service {
            id,
            shop_id,
            name: name.clone(),
            description: description.clone(),
            duration_minutes,
            price,
            ..Service::default()
        };
        entity.events.push(ServiceEvent::ServiceListed {
            id,
            shop_id,
            name,
            description,
            duration_minutes,
            price,
        });
        Ok(entity)
    }

    pub fn describe(&mut self, name: String, description: String) -> Result<(), ServiceError> {
        Self::validate_name(&name)?;
        self.name = name.clone();
        self.description = description.clone();
        self.events.push(ServiceEvent::ServiceDescribed {
            id: self.id,
            name,
            description,
        });
        Ok(())
    }

    pub fn change_duration(&mut self, duration_minutes: u32) -> Result<(), ServiceError> {
        Self::validate_duration(duration_minutes)?;
        self.duration_minutes = duration_minutes;
        self.events.push(ServiceEvent::DurationChanged {
            id: self.id,
            duration_minutes,
        });
        Ok(())
    }

    pub fn change_price(&mut self, price: Money) {
        self.price = price;
        self.events.push(ServiceEvent::PriceChanged {
            id: self.id,
            price,
        });
    }

    pub fn shop_id(&self) -> ShopId {
        self.shop_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn price(&self) -> Money {
        self.price
    }

    fn validate_id(&self, id: &ServiceId) -> Result<(), ServiceError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ServiceError::MismatchedId),
        }
    }

    fn validate_name(name: &str) -> Result<(), ServiceError> {
        match name.trim().is_empty() {
            true => Err(ServiceError::NameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_duration(duration_minutes: u32) -> Result<(), ServiceError> {
        match duration_minutes {
            0 => Err(ServiceError::InvalidDuration),
            _ => Ok(()),
        }
    }
}

impl Entity for Service {
    type Id = ServiceId;

    const ENTITY_NAME: &'static str = "service";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Service {
    type Event = ServiceEvent;
    type Error = ServiceError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ServiceEvent::ServiceListed {
                name,
                duration_minutes,
                ..
            } => {
                Self::validate_name(name)?;
                Self::validate_duration(*duration_minutes)
            }
            ServiceEvent::ServiceDescribed { id, name, .. } => {
                self.validate_id(id)?;
                Self::validate_name(name)
            }
            ServiceEvent::DurationChanged {
                id,
                duration_minutes,
            } => {
                self.validate_id(id)?;
                Self::validate_duration(*duration_minutes)
            }
            ServiceEvent::PriceChanged { id, .. } | ServiceEvent::ServiceDelisted { id } => {
                self.validate_id(id)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ServiceEvent::ServiceListed {
                id,
                shop_id,
                name,
                description,
                duration_minutes,
                price,
            } => {
                if self.id != id {
                    if let Ok(entity) =
                        Self::list(id, shop_id, name, description, duration_minutes, price)
                    {
                        *self = entity;
                    }
                }
            }
            ServiceEvent::ServiceDescribed {
                id,
                name,
                description,
            } => {
                if self.id == id {
                    if let Err(_e) = self.describe(name, description) {}
                }
            }
            ServiceEvent::DurationChanged {
                id,
                duration_minutes,
            } => {
                if self.id == id {
                    if let Err(_e) = self.change_duration(duration_minutes) {}
                }
            }
            ServiceEvent::PriceChanged { id, price } => {
                if self.id == id {
                    self.change_price(price);
                }
            }
            ServiceEvent::ServiceDelisted { .. } => {}
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.shop_id == other.shop_id
            && self.name == other.name
            && self.description == other.description
            && self.duration_minutes == other.duration_minutes
            && self.price == other.price
    }
}

impl Eq for Service {}

/// Service errors
#[derive(Error, Display, Debug)]
pub enum ServiceError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
    #[display(fmt = "Duration must be at least one minute")]
    InvalidDuration,
}

#[cfg(test)]
mod tests {
    use super::super::Currency;
    use super::*;

    #[test]
    fn test_service_list() {
        let s = Service::list(
            ServiceId(10),
            ShopId::from(1),
            "Haircut".to_owned(),
            "Classic cut".to_owned(),
            30,
            Money::new(3500, Currency::USD),
        )
        .unwrap();
        assert_eq!(s.duration_minutes(), 30);
        assert_eq!(format!("{}", s.price()), "$3,500");
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(matches!(
            Service::list(
                ServiceId(10),
                ShopId::from(1),
                "Haircut".to_owned(),
                String::new(),
                0,
                Money::default(),
            ),
            Err(ServiceError::InvalidDuration)
        ));
    }
}
