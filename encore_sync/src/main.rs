use std::error::Error;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use encore::{
    domain::{
        core::{
            BookingRequest, BookingRequestEvent, BookingStatus, Calendar, CalendarEvent,
            CoreEvent, DayStatus, PerformerId,
        },
        Entity,
    },
    infrastructure::core::BookingRequestDocument,
    EncoreConfig,
};
use eventstore::{ClientSettings, Position, StreamPosition, SubscribeToAllOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, Level};
use uuid::Uuid;

static VERSION_UID: &str = "eventstore_version";

#[tokio::main]
async fn main() {
    match EncoreConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = subscribe(&config).await {
                error!("アプリケーションエラー: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("アプリケーションエラー: {}", error)
        }
    }
}

/// 処理済みイベントの位置。再起動時はここから購読を再開する
#[derive(Serialize, Deserialize)]
struct EventstoreVersion {
    id: u64,
    event_id: Uuid,
    position: Position,
}

async fn subscribe(config: &EncoreConfig) -> Result<(), Box<dyn Error>> {
    let settings = config.eventstore.url.parse::<ClientSettings>()?;
    let mut client = Client {
        eventstore: eventstore::Client::new(settings)?,
        meilisearch: meilisearch_sdk::Client::new(
            &config.meilisearch.url,
            &config.meilisearch.api_key,
        ),
    };
    client.prepare_indexes().await?;
    let position = match client
        .meilisearch
        .index(VERSION_UID)
        .get_document::<EventstoreVersion>("1")
        .await
    {
        Ok(version) => StreamPosition::Position(version.position),
        Err(_) => {
            info!("保存済みの位置が無いため最初から購読する");
            StreamPosition::Start
        }
    };
    let mut sub = client
        .eventstore
        .subscribe_to_all(&SubscribeToAllOptions::default().position(position))
        .await;
    loop {
        match sub.next().await {
            Ok(resolved) => {
                if let Ok(core_event) = CoreEvent::try_from(&resolved) {
                    info!("ドメインイベントを受信: {:?}", core_event);
                    if let Err(e) = client.execute(core_event).await {
                        error!("イベント実行エラー: {}", e);
                        continue;
                    }
                } else {
                    debug!("システムイベントを受信: {:?}", resolved);
                }
                let event = resolved.get_original_event();
                if let Err(e) = client
                    .meilisearch
                    .index(VERSION_UID)
                    .add_documents(
                        &[EventstoreVersion {
                            id: 1,
                            event_id: event.id,
                            position: event.position,
                        }],
                        Some("id"),
                    )
                    .await
                {
                    error!("バージョン情報保存失敗: {}", e);
                }
            }
            Err(e) => return Err(Box::new(e)),
        }
    }
}

#[async_trait]
pub trait Execute<E> {
    type Error: Error;
    async fn execute(&mut self, event: E) -> Result<(), Self::Error>;
}

struct Client {
    eventstore: eventstore::Client,
    meilisearch: meilisearch_sdk::Client,
}

impl Client {
    async fn prepare_indexes(&self) -> Result<(), meilisearch_sdk::errors::Error> {
        let requests = self.meilisearch.index(BookingRequest::ENTITY_NAME);
        requests
            .set_filterable_attributes(&["performer_id", "status"])
            .await?;
        requests.set_sortable_attributes(&["created_at_ts"]).await?;
        let days = self.meilisearch.index(Calendar::ENTITY_NAME);
        days.set_filterable_attributes(&["performer_id", "date", "status"])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Execute<CoreEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: CoreEvent) -> Result<(), Self::Error> {
        Ok(match event {
            CoreEvent::CalendarEvent(event) => self.execute(event).await?,
            CoreEvent::BookingRequestEvent(event) => self.execute(event).await?,
            CoreEvent::WalletEvent(event) => {
                // ウォレットは検索対象外
                debug!("ウォレットイベントをスキップ: {:?}", event);
            }
        })
    }
}

/// 空き状況の検索用ドキュメント
#[derive(Serialize, Deserialize)]
struct MeiliAvailabilityDay {
    id: String,
    performer_id: PerformerId,
    date: NaiveDate,
    status: DayStatus,
}

impl MeiliAvailabilityDay {
    fn new(performer_id: PerformerId, date: NaiveDate, status: DayStatus) -> Self {
        Self {
            id: format!("{}-{}", performer_id, date),
            performer_id,
            date,
            status,
        }
    }
}

#[async_trait]
impl Execute<CalendarEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: CalendarEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(Calendar::ENTITY_NAME);
        match event {
            CalendarEvent::CalendarOpened { .. } => {}
            CalendarEvent::DayStatusSet { id, date, status } => {
                index
                    .add_or_update(&[MeiliAvailabilityDay::new(id, date, status)], Some("id"))
                    .await?;
            }
            CalendarEvent::RangeStatusSet {
                id,
                start,
                end,
                status,
            } => {
                let mut documents = Vec::new();
                let mut date = start;
                while date <= end {
                    documents.push(MeiliAvailabilityDay::new(id, date, status));
                    date = date + Duration::days(1);
                }
                index.add_or_update(&documents, Some("id")).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Execute<BookingRequestEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: BookingRequestEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(BookingRequest::ENTITY_NAME);
        match event {
            BookingRequestEvent::BookingRequested {
                id,
                performer_id,
                venue_id,
                event_type,
                date,
                time_range,
                price,
                // 連絡先は索引に含めない
                contact: _,
                created_at,
            } => {
                let document = BookingRequestDocument {
                    id,
                    performer_id,
                    venue_id,
                    event_type,
                    date,
                    time_range,
                    price,
                    status: BookingStatus::Pending,
                    created_at,
                    created_at_ts: created_at.timestamp(),
                };
                index.add_documents(&[document], Some("id")).await?;
            }
            BookingRequestEvent::BookingAccepted { id } => {
                index
                    .add_or_update(&[json!({ "id": id, "status": "accepted" })], Some("id"))
                    .await?;
            }
            BookingRequestEvent::BookingDeclined { id } => {
                index
                    .add_or_update(&[json!({ "id": id, "status": "declined" })], Some("id"))
                    .await?;
            }
        }
        Ok(())
    }
}
