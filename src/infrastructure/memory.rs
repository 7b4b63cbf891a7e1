use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::core::{
    BookingRequest, BookingRequestId, BookingRequestPage, BookingRequestQuery,
    BookingRequestRepository, BookingRequestSummary, Calendar, CalendarRepository, PartyDirectory,
    PerformerId, VenueId, Wallet, WalletRepository,
};
use crate::domain::{Aggregation, DataAccessError, Entity, Id};

fn injected_failure() -> DataAccessError {
    DataAccessError::ConnectionError(Box::new(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "injected failure",
    )))
}

/// テスト用のインメモリリポジトリ
///
/// 本物のイベントストアと同様にイベント列を保持し、読み出し時に畳み込む。
/// 遅延と失敗を注入できる。
#[derive(Clone)]
pub struct MemoryRepository<A: Aggregation> {
    streams: Arc<RwLock<HashMap<u64, Vec<<A as Aggregation>::Event>>>>,
    latency: Option<Duration>,
    failing: Arc<AtomicBool>,
}

impl<A: Aggregation> Default for MemoryRepository<A> {
    fn default() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            latency: None,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<A> MemoryRepository<A>
where
    A: Aggregation,
    <A as Entity>::Id: Id<Inner = u64>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 全操作に一定の遅延を加える
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 以降の全操作を失敗させるかどうかを切り替える
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn simulate(&self) -> Result<(), DataAccessError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }

    async fn get(&self, id: <A as Entity>::Id) -> Result<Option<A>, DataAccessError> {
        self.simulate().await?;
        let streams = self.streams.read().expect("memory stream lock poisoned");
        match streams.get(&*id) {
            None => Ok(None),
            Some(events) => {
                let mut entity = A::default();
                for event in events.clone() {
                    entity.apply(event);
                }
                entity.clear();
                Ok(Some(entity))
            }
        }
    }

    async fn put(&self, entity: &mut A) -> Result<bool, DataAccessError> {
        self.simulate().await?;
        let events = entity.pop_all();
        if events.is_empty() {
            return Ok(false);
        }
        let mut streams = self.streams.write().expect("memory stream lock poisoned");
        streams.entry(*entity.id()).or_default().extend(events);
        Ok(true)
    }
}

#[async_trait]
impl CalendarRepository for MemoryRepository<Calendar> {
    async fn find_by_id(&self, id: PerformerId) -> Result<Option<Calendar>, DataAccessError> {
        self.get(id).await
    }

    async fn save(&mut self, entity: &mut Calendar) -> Result<bool, DataAccessError> {
        self.put(entity).await
    }
}

#[async_trait]
impl BookingRequestRepository for MemoryRepository<BookingRequest> {
    async fn find_by_id(
        &self,
        id: BookingRequestId,
    ) -> Result<Option<BookingRequest>, DataAccessError> {
        self.get(id).await
    }

    async fn save(&mut self, entity: &mut BookingRequest) -> Result<bool, DataAccessError> {
        self.put(entity).await
    }
}

#[async_trait]
impl WalletRepository for MemoryRepository<Wallet> {
    async fn find_by_id(&self, id: PerformerId) -> Result<Option<Wallet>, DataAccessError> {
        self.get(id).await
    }

    async fn save(&mut self, entity: &mut Wallet) -> Result<bool, DataAccessError> {
        self.put(entity).await
    }
}

#[async_trait]
impl BookingRequestQuery for MemoryRepository<BookingRequest> {
    async fn list(
        &self,
        performer_id: PerformerId,
        page: u32,
        page_size: u32,
    ) -> Result<BookingRequestPage, DataAccessError> {
        self.simulate().await?;
        let mut items: Vec<BookingRequestSummary> = {
            let streams = self.streams.read().expect("memory stream lock poisoned");
            streams
                .values()
                .filter_map(|events| {
                    let mut entity = BookingRequest::default();
                    for event in events.clone() {
                        entity.apply(event);
                    }
                    entity.clear();
                    (entity.performer_id() == performer_id).then(|| entity.summary())
                })
                .collect()
        };
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| (*b.id).cmp(&*a.id))
        });
        let total = items.len() as u64;
        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        let items = items
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok(BookingRequestPage { items, total })
    }
}

/// テスト用の演者・会場ディレクトリ
///
/// 既定では全てのIDが存在するものとして応答する。
#[derive(Clone, Default)]
pub struct MemoryPartyDirectory {
    latency: Option<Duration>,
    missing_performers: Arc<RwLock<HashSet<u64>>>,
    missing_venues: Arc<RwLock<HashSet<u64>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn remove_performer(&self, id: PerformerId) {
        self.missing_performers
            .write()
            .expect("directory lock poisoned")
            .insert(*id);
    }

    pub fn remove_venue(&self, id: VenueId) {
        self.missing_venues
            .write()
            .expect("directory lock poisoned")
            .insert(*id);
    }

    async fn simulate(&self) -> Result<(), DataAccessError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl PartyDirectory for MemoryPartyDirectory {
    async fn performer_exists(&self, id: PerformerId) -> Result<bool, DataAccessError> {
        self.simulate().await?;
        Ok(!self
            .missing_performers
            .read()
            .expect("directory lock poisoned")
            .contains(&*id))
    }

    async fn venue_exists(&self, id: VenueId) -> Result<bool, DataAccessError> {
        self.simulate().await?;
        Ok(!self
            .missing_venues
            .read()
            .expect("directory lock poisoned")
            .contains(&*id))
    }
}
