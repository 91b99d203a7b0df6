use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{Service, ServiceEvent, ServiceId, ServiceRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, stream_name, try_from_resolved_event, EventConvertError};

#[derive(Clone)]
pub struct EventStoreServiceRepository {
    client: Client,
}

impl EventStoreServiceRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceRepository for EventStoreServiceRepository {
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Service>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Service::default();
                loop {
                    match stream.next().await {
                        Ok(Some(e)) => entity.apply(TryFrom::try_from(&e)?),
                        Ok(_) => break,
                        Err(eventstore::Error::ResourceDeleted) => return Ok(None),
                        Err(eventstore::Error::ResourceNotFound) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                }
                if entity.peek().is_none() {
                    Ok(None)
                } else {
                    entity.clear();
                    Ok(Some(entity))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entity: &mut Service) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Service>(entity.id());
        let rev = match entity.peek() {
            Some(ServiceEvent::ServiceListed { .. }) => ExpectedRevision::NoStream,
            Some(_) => ExpectedRevision::StreamExists,
            None => return Ok(false),
        };
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                entity
                    .pop_all()
                    .into_iter()
                    .map(EventData::from)
                    .collect::<Vec<_>>(),
            )
            .await?;
        Ok(true)
    }

    async fn delete(&self, entity: &mut Service) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Service>(entity.id());
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(ExpectedRevision::StreamExists),
                EventData::from(ServiceEvent::ServiceDelisted { id: entity.id() }),
            )
            .await?;
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        Ok(true)
    }
}

impl From<ServiceEvent> for EventData {
    fn from(value: ServiceEvent) -> Self {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for ServiceEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
