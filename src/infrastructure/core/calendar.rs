use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{Calendar, CalendarEvent, CalendarRepository, PerformerId};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{stream_name, to_event_data, try_from_resolved_event};
use crate::infrastructure::EventConvertError;

#[derive(Clone)]
pub struct EventStoreCalendarRepository {
    client: Client,
}

impl EventStoreCalendarRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CalendarRepository for EventStoreCalendarRepository {
    async fn find_by_id(&self, id: PerformerId) -> Result<Option<Calendar>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Calendar>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Calendar::default();
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

    async fn save(&mut self, entity: &mut Calendar) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Calendar>(entity.id());
        let rev = match entity.peek() {
            Some(CalendarEvent::CalendarOpened { .. }) => ExpectedRevision::NoStream,
            Some(_) => ExpectedRevision::StreamExists,
            None => return Ok(false),
        };
        let events = entity
            .pop_all()
            .into_iter()
            .map(EventData::try_from)
            .collect::<Result<Vec<_>, EventConvertError>>()?;
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                events,
            )
            .await?;
        Ok(true)
    }
}

impl TryFrom<CalendarEvent> for EventData {
    type Error = EventConvertError;

    fn try_from(value: CalendarEvent) -> Result<Self, Self::Error> {
        to_event_data(value)
    }
}

impl TryFrom<&ResolvedEvent> for CalendarEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
