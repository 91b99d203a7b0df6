use async_trait::async_trait;
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{ScheduleId, ServiceId, ShopId};

/// Provider repository
#[async_trait]
pub trait ProviderRepository {
    /// Find a provider by id
    async fn find_by_id(&self, id: ProviderId) -> Result<Option<Provider>, DataAccessError>;
    /// Save a provider
    async fn save(&self, entity: &mut Provider) -> Result<bool, DataAccessError>;
    /// Delete a provider
    async fn delete(&self, entity: &mut Provider) -> Result<bool, DataAccessError>;
}

/// Provider id
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Deref,
    Default,
)]
pub struct ProviderId(u64);

impl Id for ProviderId {
    type Inner = u64;
}

/// Provider events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEvent {
    /// A provider joined a shop
    ProviderJoined {
        id: ProviderId,
        shop_id: ShopId,
        name: String,
    },
    /// The provider was renamed
    ProviderRenamed { id: ProviderId, name: String },
    /// The provider became qualified for a service
    ServiceQualified {
        id: ProviderId,
        service_id: ServiceId,
    },
    /// A service qualification was withdrawn
    ServiceUnqualified {
        id: ProviderId,
        service_id: ServiceId,
    },
    /// A personal working-hours schedule replaced the shop default
    ScheduleAssigned {
        id: ProviderId,
        schedule_id: Option<ScheduleId>,
    },
    /// Opt in or out of auto-assignment for bookings with no named provider
    UnassignedPolicyChanged {
        id: ProviderId,
        accepts_unassigned: bool,
    },
    /// The provider retired and takes no further bookings
    ProviderRetired { id: ProviderId },
}

impl Event for ProviderEvent {
    type Id = ProviderId;
}

/// Someone who performs services at a shop.
#[derive(Debug, Clone, IntoIterator, Serialize, Deserialize)]
pub struct Provider {
    id: ProviderId,
    shop_id: ShopId,
    name: String,
    service_ids: Vec<ServiceId>,
    schedule_id: Option<ScheduleId>,
    accepts_unassigned: bool,
    active: bool,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<ProviderEvent>,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            id: ProviderId::default(),
            shop_id: ShopId::default(),
            name: String::new(),
            service_ids: Vec::new(),
            schedule_id: None,
            accepts_unassigned: true,
            active: true,
            events: EventQueue::new(),
        }
    }
}

impl Provider {
    pub fn join(id: ProviderId, shop_id: ShopId, name: String) -> Result<Self, ProviderError> {
        Self::validate_name(&name)?;
        let mut entity = Provider {
            id,
            shop_id,
            name: name.clone(),
            ..Provider::default()
        };
        entity
            .events
            .push(ProviderEvent::ProviderJoined { id, shop_id, name });
        Ok(entity)
    }

    pub fn rename(&mut self, name: String) -> Result<(), ProviderError> {
        Self::validate_name(&name)?;
        self.name = name.clone();
        self.events
            .push(ProviderEvent::ProviderRenamed { id: self.id, name });
        Ok(())
    }

    pub fn qualify(&mut self, service_id: ServiceId) -> Result<(), ProviderError> {
        self.validate_qualify(&service_id)?;
        self.service_ids.push(service_id);
        self.events.push(ProviderEvent::ServiceQualified {
            id: self.id,
            service_id,
        });
        Ok(())
    }

    pub fn unqualify(&mut self, service_id: ServiceId) -> Result<(), ProviderError> {
        self.validate_unqualify(&service_id)?;
        self.service_ids.retain(|s| *s != service_id);
        self.events.push(ProviderEvent::ServiceUnqualified {
            id: self.id,
            service_id,
        });
        Ok(())
    }

    pub fn assign_schedule(&mut self, schedule_id: Option<ScheduleId>) {
        self.schedule_id = schedule_id;
        self.events.push(ProviderEvent::ScheduleAssigned {
            id: self.id,
            schedule_id,
        });
    }

    pub fn set_accepts_unassigned(&mut self, accepts_unassigned: bool) {
        self.accepts_unassigned = accepts_unassigned;
        self.events.push(ProviderEvent::UnassignedPolicyChanged {
            id: self.id,
            accepts_unassigned,
        });
    }

    pub fn retire(&mut self) -> Result<(), ProviderError> {
        self.validate_active()?;
        self.active = false;
        self.events
            .push(ProviderEvent::ProviderRetired { id: self.id });
        Ok(())
    }

    pub fn shop_id(&self) -> ShopId {
        self.shop_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule_id(&self) -> Option<ScheduleId> {
        self.schedule_id
    }

    pub fn accepts_unassigned(&self) -> bool {
        self.accepts_unassigned
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn performs(&self, service_id: ServiceId) -> bool {
        self.service_ids.contains(&service_id)
    }

    fn validate_id(&self, id: &ProviderId) -> Result<(), ProviderError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ProviderError::MismatchedId),
        }
    }

    fn validate_name(name: &str) -> Result<(), ProviderError> {
        match name.trim().is_empty() {
            true => Err(ProviderError::NameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_active(&self) -> Result<(), ProviderError> {
        match self.active {
            true => Ok(()),
            false => Err(ProviderError::AlreadyRetired),
        }
    }

    fn validate_qualify(&self, service_id: &ServiceId) -> Result<(), ProviderError> {
        match self.service_ids.contains(service_id) {
            true => Err(ProviderError::DuplicateService),
            false => Ok(()),
        }
    }

    fn validate_unqualify(&self, service_id: &ServiceId) -> Result<(), ProviderError> {
        match self.service_ids.contains(service_id) {
            true => Ok(()),
            false => Err(ProviderError::ServiceNotFound),
        }
    }
}

impl Entity for Provider {
    type Id = ProviderId;

    const ENTITY_NAME: &'static str = "provider";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Provider {
    type Event = ProviderEvent;
    type Error = ProviderError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ProviderEvent::ProviderJoined { name, .. } => Self::validate_name(name),
            ProviderEvent::ProviderRenamed { id, name } => {
                self.validate_id(id)?;
                Self::validate_name(name)
            }
            ProviderEvent::ServiceQualified { id, service_id } => {
                self.validate_id(id)?;
                self.validate_qualify(service_id)
            }
            ProviderEvent::ServiceUnqualified { id, service_id } => {
                self.validate_id(id)?;
                self.validate_unqualify(service_id)
            }
            ProviderEvent::ScheduleAssigned { id, .. }
            | ProviderEvent::UnassignedPolicyChanged { id, .. } => self.validate_id(id),
            ProviderEvent::ProviderRetired { id } => {
                self.validate_id(id)?;
                self.validate_active()
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ProviderEvent::ProviderJoined { id, shop_id, name } => {
                if self.id != id {
                    if let Ok(entity) = Self::join(id, shop_id, name) {
                        *self = entity;
                    }
                }
            }
            ProviderEvent::ProviderRenamed { id, name } => {
                if self.id == id {
                    if let Err(_e) = self.rename(name) {}
                }
            }
            ProviderEvent::ServiceQualified { id, service_id } => {
                if self.id == id {
                    if let Err(_e) = self.qualify(service_id) {}
                }
            }
            ProviderEvent::ServiceUnqualified { id, service_id } => {
                if self.id == id {
                    if let Err(_e) = self.unqualify(service_id) {}
                }
            }
            ProviderEvent::ScheduleAssigned { id, schedule_id } => {
                if self.id == id {
                    self.assign_schedule(schedule_id);
                }
            }
            ProviderEvent::UnassignedPolicyChanged {
                id,
                accepts_unassigned,
            } => {
                if self.id == id {
                    self.set_accepts_unassigned(accepts_unassigned);
                }
            }
            ProviderEvent::ProviderRetired { id } => {
                if self.id == id {
                    if let Err(_e) = self.retire() {}
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

impl PartialEq for Provider {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.shop_id == other.shop_id
            && self.name == other.name
            && self.service_ids == other.service_ids
            && self.schedule_id == other.schedule_id
            && self.accepts_unassigned == other.accepts_unassigned
            && self.active == other.active
    }
}

impl Eq for Provider {}

/// Provider errors
#[derive(Error, Display, Debug)]
pub enum ProviderError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
    #[display(fmt = "Provider is already qualified for the service")]
    DuplicateService,
    #[display(fmt = "Provider is not qualified for the service")]
    ServiceNotFound,
    #[display(fmt = "Provider has already retired")]
    AlreadyRetired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_join_and_qualify() {
        let mut p = Provider::join(ProviderId(3), ShopId::from(1), "Alice".to_owned()).unwrap();
        p.qualify(ServiceId::from(10)).unwrap();
        assert!(p.performs(ServiceId::from(10)));
        assert!(!p.performs(ServiceId::from(11)));
        assert!(matches!(
            p.qualify(ServiceId::from(10)),
            Err(ProviderError::DuplicateService)
        ));
    }

    #[test]
    fn test_retire_twice_rejected() {
        let mut p = Provider::join(ProviderId(3), ShopId::from(1), "Alice".to_owned()).unwrap();
        p.retire().unwrap();
        assert!(!p.is_active());
        assert!(matches!(p.retire(), Err(ProviderError::AlreadyRetired)));
    }
}
