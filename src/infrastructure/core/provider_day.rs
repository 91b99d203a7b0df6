use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{ProviderDay, ProviderDayEvent, ProviderDayId, ProviderDayRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, stream_name, try_from_resolved_event, EventConvertError};

/// Day-ledger repository. Unlike the other repositories this one appends at
/// the exact revision the ledger was read at: claims race on these streams,
/// and the loser of an append must find out and reload.
#[derive(Clone)]
pub struct EventStoreProviderDayRepository {
    client: Client,
}

impl EventStoreProviderDayRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderDayRepository for EventStoreProviderDayRepository {
    async fn find_by_id(&self, id: ProviderDayId) -> Result<Option<ProviderDay>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<ProviderDay>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = ProviderDay::default();
                let mut revision = None;
                loop {
                    match stream.next().await {
                        Ok(Some(e)) => {
                            revision = Some(e.get_original_event().revision);
                            entity.apply(TryFrom::try_from(&e)?);
                        }
                        Ok(_) => break,
                        Err(eventstore::Error::ResourceDeleted) => return Ok(None),
                        Err(eventstore::Error::ResourceNotFound) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                }
                match revision {
                    None => Ok(None),
                    Some(revision) => {
                        entity.clear();
                        entity.set_revision(revision);
                        Ok(Some(entity))
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entity: &mut ProviderDay) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<ProviderDay>(entity.id());
        if entity.peek().is_none() {
            return Ok(false);
        }
        let rev = match entity.revision() {
            Some(revision) => ExpectedRevision::Exact(revision),
            None => ExpectedRevision::NoStream,
        };
        let result = self
            .client
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
        entity.set_revision(result.next_expected_version);
        Ok(true)
    }

    async fn delete(&self, entity: &mut ProviderDay) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<ProviderDay>(entity.id());
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        Ok(true)
    }
}

impl From<ProviderDayEvent> for EventData {
    fn from(value: ProviderDayEvent) -> Self {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for ProviderDayEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
