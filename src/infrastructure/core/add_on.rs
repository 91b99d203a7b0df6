use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{AddOn, AddOnEvent, AddOnId, AddOnRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, stream_name, try_from_resolved_event, EventConvertError};

#[derive(Clone)]
pub struct EventStoreAddOnRepository {
    client: Client,
}

impl EventStoreAddOnRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AddOnRepository for EventStoreAddOnRepository {
    async fn find_by_id(&self, id: AddOnId) -> Result<Option<AddOn>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<AddOn>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = AddOn::default();
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

    async fn save(&self, entity: &mut AddOn) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<AddOn>(entity.id());
        let rev = match entity.peek() {
            Some(AddOnEvent::AddOnListed { .. }) => ExpectedRevision::NoStream,
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

    async fn delete(&self, entity: &mut AddOn) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<AddOn>(entity.id());
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(ExpectedRevision::StreamExists),
                EventData::from(AddOnEvent::AddOnDelisted { id: entity.id() }),
            )
            .await?;
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        Ok(true)
    }
}

impl From<AddOnEvent> for EventData {
    fn from(value: AddOnEvent) -> Self {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for AddOnEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
