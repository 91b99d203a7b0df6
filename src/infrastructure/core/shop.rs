use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{Shop, ShopEvent, ShopId, ShopRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, stream_name, try_from_resolved_event, EventConvertError};

#[derive(Clone)]
pub struct EventStoreShopRepository {
    client: Client,
}

impl EventStoreShopRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ShopRepository for EventStoreShopRepository {
    async fn find_by_id(&self, id: ShopId) -> Result<Option<Shop>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Shop>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Shop::default();
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

    async fn save(&self, entity: &mut Shop) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Shop>(entity.id());
        let rev = match entity.peek() {
            Some(ShopEvent::ShopOpened { .. }) => ExpectedRevision::NoStream,
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

    async fn delete(&self, entity: &mut Shop) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Shop>(entity.id());
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(ExpectedRevision::StreamExists),
                EventData::from(ShopEvent::ShopDeleted { id: entity.id() }),
            )
            .await?;
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        Ok(true)
    }
}

impl From<ShopEvent> for EventData {
    fn from(value: ShopEvent) -> Self {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for ShopEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
