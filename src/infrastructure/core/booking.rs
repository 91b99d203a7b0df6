use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{Booking, BookingEvent, BookingId, BookingRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{from_event, stream_name, try_from_resolved_event, EventConvertError};

#[derive(Clone)]
pub struct EventStoreBookingRepository {
    client: Client,
}

impl EventStoreBookingRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BookingRepository for EventStoreBookingRepository {
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Booking>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Booking::default();
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

    async fn save(&self, entity: &mut Booking) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Booking>(entity.id());
        let rev = match entity.peek() {
            Some(BookingEvent::BookingCreated { .. }) => ExpectedRevision::NoStream,
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

    async fn delete(&self, entity: &mut Booking) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Booking>(entity.id());
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        Ok(true)
    }
}

impl From<BookingEvent> for EventData {
    fn from(value: BookingEvent) -> Self {
        from_event(value)
    }
}

impl TryFrom<&ResolvedEvent> for BookingEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
