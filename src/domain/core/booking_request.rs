use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{Money, PerformerId, TimeRange, VenueId};

/// 予約リクエストのリポジトリトレイト
#[async_trait]
pub trait BookingRequestRepository {
    /// IDから予約リクエストを取得する
    async fn find_by_id(
        &self,
        id: BookingRequestId,
    ) -> Result<Option<BookingRequest>, DataAccessError>;
    /// 予約リクエストを保存する
    async fn save(&mut self, entity: &mut BookingRequest) -> Result<bool, DataAccessError>;
}

/// 予約リクエストの読み取り側クエリ
#[async_trait]
pub trait BookingRequestQuery {
    /// 演者の予約リクエストを作成日時の降順でページングして返す
    async fn list(
        &self,
        performer_id: PerformerId,
        page: u32,
        page_size: u32,
    ) -> Result<BookingRequestPage, DataAccessError>;
}

/// ページングされた予約リクエスト一覧
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequestPage {
    pub items: Vec<BookingRequestSummary>,
    pub total: u64,
}

/// 一覧表示用の予約リクエスト
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequestSummary {
    pub id: BookingRequestId,
    pub performer_id: PerformerId,
    pub venue_id: VenueId,
    pub event_type: String,
    pub date: NaiveDate,
    pub time_range: TimeRange,
    pub price: Money,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// 予約リクエストID
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct BookingRequestId(u64);

impl Id for BookingRequestId {
    type Inner = u64;
}

/// 予約リクエストのステータス
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// 回答待ち
    #[default]
    Pending,
    /// 承諾
    Accepted,
    /// 辞退
    Declined,
}

/// 予約リクエストの連絡先
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub phone: String,
}

/// 予約リクエストのイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingRequestEvent {
    /// 予約リクエストが作成された
    BookingRequested {
        id: BookingRequestId,
        performer_id: PerformerId,
        venue_id: VenueId,
        event_type: String,
        date: NaiveDate,
        time_range: TimeRange,
        price: Money,
        contact: ContactInfo,
        created_at: DateTime<Utc>,
    },
    /// 予約リクエストが承諾された
    BookingAccepted { id: BookingRequestId },
    /// 予約リクエストが辞退された
    BookingDeclined { id: BookingRequestId },
}

impl Event for BookingRequestEvent {
    type Id = BookingRequestId;
}

/// 予約リクエストエンティティ
///
/// ステータスは `pending` から `accepted` または `declined` へ一度だけ遷移する。
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct BookingRequest {
    id: BookingRequestId,
    performer_id: PerformerId,
    venue_id: VenueId,
    event_type: String,
    date: NaiveDate,
    time_range: TimeRange,
    price: Money,
    contact: ContactInfo,
    status: BookingStatus,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<BookingRequestEvent>,
}

impl BookingRequest {
    pub fn create(
        id: BookingRequestId,
        performer_id: PerformerId,
        venue_id: VenueId,
        event_type: String,
        date: NaiveDate,
        time_range: TimeRange,
        price: Money,
        contact: ContactInfo,
        created_at: DateTime<Utc>,
    ) -> Result<Self, BookingRequestError> {
        Self::validate_created(&event_type, &time_range, &contact)?;
        let mut entity = BookingRequest {
            id,
            performer_id,
            venue_id,
            event_type: event_type.clone(),
            date,
            time_range,
            price,
            contact: contact.clone(),
            status: BookingStatus::Pending,
            created_at,
            ..BookingRequest::default()
        };
        entity.events.push(BookingRequestEvent::BookingRequested {
            id,
            performer_id,
            venue_id,
            event_type,
            date,
            time_range,
            price,
            contact,
            created_at,
        });
        Ok(entity)
    }

    /// 予約リクエストを承諾する
    pub fn accept(&mut self) -> Result<(), BookingRequestError> {
        self.validate_pending()?;
        self.status = BookingStatus::Accepted;
        self.events
            .push(BookingRequestEvent::BookingAccepted { id: self.id });
        Ok(())
    }

    /// 予約リクエストを辞退する
    pub fn decline(&mut self) -> Result<(), BookingRequestError> {
        self.validate_pending()?;
        self.status = BookingStatus::Declined;
        self.events
            .push(BookingRequestEvent::BookingDeclined { id: self.id });
        Ok(())
    }

    pub fn performer_id(&self) -> PerformerId {
        self.performer_id
    }

    pub fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn summary(&self) -> BookingRequestSummary {
        BookingRequestSummary {
            id: self.id,
            performer_id: self.performer_id,
            venue_id: self.venue_id,
            event_type: self.event_type.clone(),
            date: self.date,
            time_range: self.time_range,
            price: self.price,
            status: self.status,
            created_at: self.created_at,
        }
    }

    fn validate_id(&self, id: &BookingRequestId) -> Result<(), BookingRequestError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(BookingRequestError::MismatchedId),
        }
    }

    fn validate_created(
        event_type: &str,
        time_range: &TimeRange,
        contact: &ContactInfo,
    ) -> Result<(), BookingRequestError> {
        if event_type.trim().is_empty() {
            return Err(BookingRequestError::EventTypeRequired);
        }
        Self::validate_time_range(time_range)?;
        Self::validate_contact(contact)
    }

    fn validate_time_range(time_range: &TimeRange) -> Result<(), BookingRequestError> {
        if time_range.start >= time_range.end || time_range.end > 24 {
            return Err(BookingRequestError::InvalidTimeRange);
        }
        Ok(())
    }

    fn validate_contact(contact: &ContactInfo) -> Result<(), BookingRequestError> {
        if contact.name.trim().is_empty() {
            return Err(BookingRequestError::ContactNameRequired);
        }
        if contact.phone.trim().is_empty() {
            return Err(BookingRequestError::ContactPhoneRequired);
        }
        Ok(())
    }

    fn validate_pending(&self) -> Result<(), BookingRequestError> {
        match self.status {
            BookingStatus::Pending => Ok(()),
            _ => Err(BookingRequestError::InvalidTransition),
        }
    }
}

impl Entity for BookingRequest {
    type Id = BookingRequestId;

    const ENTITY_NAME: &'static str = "booking_request";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for BookingRequest {
    type Event = BookingRequestEvent;
    type Error = BookingRequestError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            BookingRequestEvent::BookingRequested {
                event_type,
                time_range,
                contact,
                ..
            } => Self::validate_created(event_type, time_range, contact),
            BookingRequestEvent::BookingAccepted { id }
            | BookingRequestEvent::BookingDeclined { id } => {
                self.validate_id(id)?;
                self.validate_pending()
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            BookingRequestEvent::BookingRequested {
                id,
                performer_id,
                venue_id,
                event_type,
                date,
                time_range,
                price,
                contact,
                created_at,
            } => {
                if self.id != id {
                    if let Ok(entity) = Self::create(
                        id,
                        performer_id,
                        venue_id,
                        event_type,
                        date,
                        time_range,
                        price,
                        contact,
                        created_at,
                    ) {
                        *self = entity;
                    }
                }
            }
            BookingRequestEvent::BookingAccepted { id } => {
                if self.id == id {
                    if let Err(_e) = self.accept() {}
                }
            }
            BookingRequestEvent::BookingDeclined { id } => {
                if self.id == id {
                    if let Err(_e) = self.decline() {}
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

impl PartialEq for BookingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.performer_id == other.performer_id
            && self.venue_id == other.venue_id
            && self.event_type == other.event_type
            && self.date == other.date
            && self.time_range == other.time_range
            && self.price == other.price
            && self.contact == other.contact
            && self.status == other.status
            && self.created_at == other.created_at
    }
}

impl Eq for BookingRequest {}

/// 予約リクエストのエラー
#[derive(Error, Display, Debug)]
pub enum BookingRequestError {
    /// IDが一致しません
    #[display(fmt = "ID does not match")]
    MismatchedId,
    /// イベント名が指定されていません
    #[display(fmt = "Event type is not specified")]
    EventTypeRequired,
    /// 時間帯が不正です
    #[display(fmt = "Invalid time range")]
    InvalidTimeRange,
    /// 連絡先の名前が指定されていません
    #[display(fmt = "Contact name is not specified")]
    ContactNameRequired,
    /// 連絡先の電話番号が指定されていません
    #[display(fmt = "Contact phone is not specified")]
    ContactPhoneRequired,
    /// 回答済みのリクエストには回答できません
    #[display(fmt = "The request has already been responded to")]
    InvalidTransition,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BookingRequest {
        BookingRequest::create(
            BookingRequestId::from(100),
            PerformerId::from(1),
            VenueId::from(2),
            "Wedding".to_owned(),
            "2024-07-01".parse().unwrap(),
            TimeRange::new(20, 22),
            Money::usd(209),
            ContactInfo {
                name: "田中太郎".to_owned(),
                phone: "090-0000-0000".to_owned(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_is_pending() {
        let entity = request();
        assert_eq!(entity.status(), BookingStatus::Pending);
        assert_eq!(entity.price(), Money::usd(209));
    }

    #[test]
    fn test_create_requires_details() {
        let result = BookingRequest::create(
            BookingRequestId::from(100),
            PerformerId::from(1),
            VenueId::from(2),
            "".to_owned(),
            "2024-07-01".parse().unwrap(),
            TimeRange::new(20, 22),
            Money::usd(209),
            ContactInfo::default(),
            Utc::now(),
        );
        assert!(matches!(result, Err(BookingRequestError::EventTypeRequired)));
    }

    #[test]
    fn test_create_rejects_inverted_time() {
        let result = BookingRequest::create(
            BookingRequestId::from(100),
            PerformerId::from(1),
            VenueId::from(2),
            "Wedding".to_owned(),
            "2024-07-01".parse().unwrap(),
            TimeRange::new(22, 20),
            Money::usd(209),
            ContactInfo {
                name: "田中太郎".to_owned(),
                phone: "090-0000-0000".to_owned(),
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(BookingRequestError::InvalidTimeRange)));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut entity = request();
        entity.accept().unwrap();
        assert_eq!(entity.status(), BookingStatus::Accepted);

        // 一度回答したリクエストはどちらの回答も受け付けない
        assert!(matches!(
            entity.accept(),
            Err(BookingRequestError::InvalidTransition)
        ));
        assert!(matches!(
            entity.decline(),
            Err(BookingRequestError::InvalidTransition)
        ));
        assert_eq!(entity.status(), BookingStatus::Accepted);
    }

    #[test]
    fn test_decline_is_terminal() {
        let mut entity = request();
        entity.decline().unwrap();
        assert_eq!(entity.status(), BookingStatus::Declined);
        assert!(matches!(
            entity.accept(),
            Err(BookingRequestError::InvalidTransition)
        ));
    }

    #[test]
    fn test_rehydrate_from_events() {
        let mut source = request();
        source.accept().unwrap();

        let mut replayed = BookingRequest::default();
        for event in source.pop_all() {
            replayed.apply(event);
        }
        replayed.clear();
        assert_eq!(replayed, source);
    }
}
