use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};
use serde::{Deserialize, Serialize};

use crate::domain::core::{
    BookingRequest, BookingRequestEvent, BookingRequestId, BookingRequestPage,
    BookingRequestQuery, BookingRequestRepository, BookingRequestSummary, BookingStatus, Money,
    PerformerId, TimeRange, VenueId,
};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::EventConvertError;
use crate::infrastructure::{stream_name, to_event_data, try_from_resolved_event};

#[derive(Clone)]
pub struct EventStoreBookingRequestRepository {
    client: Client,
}

impl EventStoreBookingRequestRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BookingRequestRepository for EventStoreBookingRequestRepository {
    async fn find_by_id(
        &self,
        id: BookingRequestId,
    ) -> Result<Option<BookingRequest>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<BookingRequest>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = BookingRequest::default();
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

    async fn save(&mut self, entity: &mut BookingRequest) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<BookingRequest>(entity.id());
        let rev = match entity.peek() {
            Some(BookingRequestEvent::BookingRequested { .. }) => ExpectedRevision::NoStream,
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

impl TryFrom<BookingRequestEvent> for EventData {
    type Error = EventConvertError;

    fn try_from(value: BookingRequestEvent) -> Result<Self, Self::Error> {
        to_event_data(value)
    }
}

impl TryFrom<&ResolvedEvent> for BookingRequestEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}

/// Meilisearchに登録する予約リクエストのドキュメント
///
/// `created_at_ts` は作成日時の降順ソートに使う。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequestDocument {
    pub id: BookingRequestId,
    pub performer_id: PerformerId,
    pub venue_id: VenueId,
    pub event_type: String,
    pub date: NaiveDate,
    pub time_range: TimeRange,
    pub price: Money,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub created_at_ts: i64,
}

impl BookingRequestDocument {
    pub fn into_summary(self) -> BookingRequestSummary {
        BookingRequestSummary {
            id: self.id,
            performer_id: self.performer_id,
            venue_id: self.venue_id,
            event_type: self.event_type,
            date: self.date,
            time_range: self.time_range,
            price: self.price,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

impl From<BookingRequestSummary> for BookingRequestDocument {
    fn from(value: BookingRequestSummary) -> Self {
        Self {
            id: value.id,
            performer_id: value.performer_id,
            venue_id: value.venue_id,
            event_type: value.event_type,
            date: value.date,
            time_range: value.time_range,
            price: value.price,
            status: value.status,
            created_at: value.created_at,
            created_at_ts: value.created_at.timestamp(),
        }
    }
}

/// Meilisearchの読み取り側クエリ
pub struct MeiliBookingRequestQuery {
    client: meilisearch_sdk::Client,
}

impl MeiliBookingRequestQuery {
    pub fn new(client: meilisearch_sdk::Client) -> Self {
        Self { client }
    }
}

fn meili_error(error: meilisearch_sdk::errors::Error) -> DataAccessError {
    DataAccessError::QueryError(Box::new(error))
}

#[async_trait]
impl BookingRequestQuery for MeiliBookingRequestQuery {
    async fn list(
        &self,
        performer_id: PerformerId,
        page: u32,
        page_size: u32,
    ) -> Result<BookingRequestPage, DataAccessError> {
        let index = self.client.index(BookingRequest::ENTITY_NAME);
        let filter = format!("performer_id = {}", performer_id);
        let sort = ["created_at_ts:desc"];
        let results = index
            .search()
            .with_filter(&filter)
            .with_sort(&sort)
            .with_offset((page.saturating_sub(1) as usize) * page_size as usize)
            .with_limit(page_size as usize)
            .execute::<BookingRequestDocument>()
            .await
            .map_err(meili_error)?;
        let total = results.estimated_total_hits.unwrap_or_default() as u64;
        let items = results
            .hits
            .into_iter()
            .map(|hit| hit.result.into_summary())
            .collect();
        Ok(BookingRequestPage { items, total })
    }
}
