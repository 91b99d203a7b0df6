use async_trait::async_trait;
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{Money, ShopId};

/// Add-on repository
#[async_trait]
pub trait AddOnRepository {
    /// Find an add-on by id
    async fn find_by_id(&self, id: AddOnId) -> Result<Option<AddOn>, DataAccessError>;
    /// Save an add-on
    async fn save(&self, entity: &mut AddOn) -> Result<bool, DataAccessError>;
    /// Delete an add-on
    async fn delete(&self, entity: &mut AddOn) -> Result<bool, DataAccessError>;
}

/// Add-on id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct AddOnId(u64);

impl Id for AddOnId {
    type Inner = u64;
}

/// Add-on events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddOnEvent {
    /// An add-on was put on the menu
    AddOnListed {
        id: AddOnId,
        shop_id: ShopId,
        name: String,
        description: String,
        duration_minutes: u32,
        price: Money,
    },
    /// Name or description changed
    AddOnDescribed {
        id: AddOnId,
        name: String,
        description: String,
    },
    /// The extra time it adds to an appointment changed
    DurationChanged { id: AddOnId, duration_minutes: u32 },
    /// The price changed
    PriceChanged { id: AddOnId, price: Money },
    /// The add-on was taken off the menu
    AddOnDelisted { id: AddOnId },
}

impl Event for AddOnEvent {
    type Id = AddOnId;
}

/// An optional extra attached to a booking. Unlike a service its duration
/// may be zero, a beard-oil finish adds price but no chair time.
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct AddOn {
    id: AddOnId,
    shop_id: ShopId,
    name: String,
    description: String,
    duration_minutes: u32,
    price: Money,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<AddOnEvent>,
}

impl AddOn {
    pub fn list(
        id: AddOnId,
        shop_id: ShopId,
        name: String,
        description: String,
        duration_minutes: u32,
        price: Money,
    ) -> Result<Self, AddOnError> {
        Self::validate_name(&name)?;
        let mut entity = AddOn {
            id,
            shop_id,
            name: name.clone(),
            description: description.clone(),
            duration_minutes,
            price,
            ..AddOn::default()
        };
        entity.events.push(AddOnEvent::AddOnListed {
            id,
            shop_id,
            name,
            description,
            duration_minutes,
            price,
        });
        Ok(entity)
    }

    pub fn describe(&mut self, name: String, description: String) -> Result<(), AddOnError> {
        Self::validate_name(&name)?;
        self.name = name.clone();
        self.description = description.clone();
        self.events.push(AddOnEvent::AddOnDescribed {
            id: self.id,
            name,
            description,
        });
        Ok(())
    }

    pub fn change_duration(&mut self, duration_minutes: u32) {
        self.duration_minutes = duration_minutes;
        self.events.push(AddOnEvent::DurationChanged {
            id: self.id,
            duration_minutes,
        });
    }

    pub fn change_price(&mut self, price: Money) {
        self.price = price;
        self.events.push(AddOnEvent::PriceChanged {
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

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn price(&self) -> Money {
        self.price
    }

    fn validate_id(&self, id: &AddOnId) -> Result<(), AddOnError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(AddOnError::MismatchedId),
        }
    }

    fn validate_name(name: &str) -> Result<(), AddOnError> {
        match name.trim().is_empty() {
            true => Err(AddOnError::NameIsBlank),
            false => Ok(()),
        }
    }
}

impl Entity for AddOn {
    type Id = AddOnId;

    const ENTITY_NAME: &'static str = "add_on";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for AddOn {
    type Event = AddOnEvent;
    type Error = AddOnError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            AddOnEvent::AddOnListed { name, .. } => Self::validate_name(name),
            AddOnEvent::AddOnDescribed { id, name, .. } => {
                self.validate_id(id)?;
                Self::validate_name(name)
            }
            AddOnEvent::DurationChanged { id, .. }
            | AddOnEvent::PriceChanged { id, .. }
            | AddOnEvent::AddOnDelisted { id } => self.validate_id(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            AddOnEvent::AddOnListed {
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
            AddOnEvent::AddOnDescribed {
                id,
                name,
                description,
            } => {
                if self.id == id {
                    if let Err(_e) = self.describe(name, description) {}
                }
            }
            AddOnEvent::DurationChanged {
                id,
                duration_minutes,
            } => {
                if self.id == id {
                    self.change_duration(duration_minutes);
                }
            }
            AddOnEvent::PriceChanged { id, price } => {
                if self.id == id {
                    self.change_price(price);
                }
            }
            AddOnEvent::AddOnDelisted { .. } => {}
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for AddOn {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.shop_id == other.shop_id
            && self.name == other.name
            && self.description == other.description
            && self.duration_minutes == other.duration_minutes
            && self.price == other.price
    }
}

impl Eq for AddOn {}

/// Add-on errors
#[derive(Error, Display, Debug)]
pub enum AddOnError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
}

#[cfg(test)]
mod tests {
    use super::super::Currency;
    use super::*;

    #[test]
    fn test_add_on_zero_duration_allowed() {
        let a = AddOn::list(
            AddOnId(20),
            ShopId::from(1),
            "Beard oil finish".to_owned(),
            String::new(),
            0,
            Money::new(500, Currency::USD),
        )
        .unwrap();
        assert_eq!(a.duration_minutes(), 0);
    }

    #[test]
    fn test_blank_name_rejected() {
        assert!(AddOn::list(
            AddOnId(20),
            ShopId::from(1),
            String::new(),
            String::new(),
            10,
            Money::default(),
        )
        .is_err());
    }
}
