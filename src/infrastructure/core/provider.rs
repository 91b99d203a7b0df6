use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{Provider, ProviderEvent, ProviderId, ProviderRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, stream_name, try_from_resolved_event, EventConvertError};

#[derive(Clone)]
pub struct EventStoreProviderRepository {
    client: Client,
}

impl EventStoreProviderRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderRepository for EventStoreProviderRepository {
    async fn find_by_id(&self, id: ProviderId) -> Result<Option<Provider>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Provider>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Provider::default();
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

    async fn save(&self, entity: &mut Provider) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Provider>(entity.id());
        let rev = match entity.peek() {
            Some(ProviderEvent::ProviderJoined { .. }) => ExpectedRevision::NoStream,
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

    async fn delete(&self, entity: &mut Provider) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Provider>(entity.id());
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        Ok(true)
    }
}

impl From<ProviderEvent> for EventData {
    fn from(value: ProviderEvent) -> Self {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for ProviderEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
