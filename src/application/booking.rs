use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::info;

use crate::domain::core::{
    bookable_slots, recommended_tier, BookingDraft, BookingRequest, BookingRequestId,
    BookingRequestPage, BookingRequestQuery, BookingRequestRepository, BookingSlot, Calendar,
    CalendarRepository, DayOverview, DayStatus, PartyDirectory, PerformerId,
};
use crate::domain::{DataAccessError, ID_GENERATOR};

use super::{PerformerLocks, ServiceError};

/// 外部ディレクトリ呼び出しの制限時間
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(3);

/// 一覧取得のページサイズ上限
pub const MAX_PAGE_SIZE: u32 = 100;

/// 予約リクエストへの回答
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingDecision {
    Accepted,
    Declined,
}

/// カレンダー・予約リクエストを扱うアプリケーションサービス
///
/// 同一演者に対する書き込みは [`PerformerLocks`] で直列化する。
pub struct BookingService<C, R, Q, D> {
    calendars: C,
    requests: R,
    query: Q,
    directory: D,
    locks: PerformerLocks,
    directory_timeout: Duration,
}

impl<C, R, Q, D> BookingService<C, R, Q, D>
where
    C: CalendarRepository + Clone + Send + Sync,
    R: BookingRequestRepository + Clone + Send + Sync,
    Q: BookingRequestQuery + Send + Sync,
    D: PartyDirectory + Send + Sync,
{
    pub fn new(calendars: C, requests: R, query: Q, directory: D) -> Self {
        Self {
            calendars,
            requests,
            query,
            directory,
            locks: PerformerLocks::new(),
            directory_timeout: DIRECTORY_TIMEOUT,
        }
    }

    pub fn with_directory_timeout(mut self, directory_timeout: Duration) -> Self {
        self.directory_timeout = directory_timeout;
        self
    }

    /// 設定済みの空き状況を全て返す
    pub async fn availability(
        &self,
        performer_id: PerformerId,
    ) -> Result<Vec<DayOverview>, ServiceError> {
        let calendar = self.load_calendar(performer_id).await?;
        Ok(calendar.days().collect())
    }

    /// 基準日を含む週の空き状況
    pub async fn weekly_overview(
        &self,
        performer_id: PerformerId,
        reference: NaiveDate,
    ) -> Result<Vec<DayOverview>, ServiceError> {
        let calendar = self.load_calendar(performer_id).await?;
        Ok(calendar.weekly_overview(reference))
    }

    /// 一日分の空き状況を上書きする
    pub async fn set_day_status(
        &self,
        performer_id: PerformerId,
        date: NaiveDate,
        status: DayStatus,
    ) -> Result<(), ServiceError> {
        let _guard = self.locks.acquire(performer_id).await;
        let mut calendars = self.calendars.clone();
        let mut calendar = self.load_calendar(performer_id).await?;
        calendar.set_day_status(date, status);
        calendars.save(&mut calendar).await?;
        Ok(())
    }

    /// 複数日の空き状況を一括で上書きする
    pub async fn set_days(
        &self,
        performer_id: PerformerId,
        days: Vec<DayOverview>,
    ) -> Result<(), ServiceError> {
        let _guard = self.locks.acquire(performer_id).await;
        let mut calendars = self.calendars.clone();
        let mut calendar = self.load_calendar(performer_id).await?;
        for day in days {
            calendar.set_day_status(day.date, day.status);
        }
        calendars.save(&mut calendar).await?;
        Ok(())
    }

    /// 期間内の空き状況を一括で上書きする
    ///
    /// 範囲が不正な場合は何も書き込まない。
    pub async fn set_range_status(
        &self,
        performer_id: PerformerId,
        start: NaiveDate,
        end: NaiveDate,
        status: DayStatus,
    ) -> Result<(), ServiceError> {
        let _guard = self.locks.acquire(performer_id).await;
        let mut calendars = self.calendars.clone();
        let mut calendar = self.load_calendar(performer_id).await?;
        calendar.set_range_status(start, end, status)?;
        calendars.save(&mut calendar).await?;
        Ok(())
    }

    /// 指定日の空き状況を返す。未設定の日は空き扱い
    pub async fn day_status(
        &self,
        performer_id: PerformerId,
        date: NaiveDate,
    ) -> Result<DayStatus, ServiceError> {
        let calendar = self.load_calendar(performer_id).await?;
        Ok(calendar.day_status(date))
    }

    /// 指定日の予約可能な時間枠を導出する
    pub async fn bookable_slots(
        &self,
        performer_id: PerformerId,
        date: NaiveDate,
    ) -> Result<Vec<BookingSlot>, ServiceError> {
        let calendar = self.load_calendar(performer_id).await?;
        Ok(bookable_slots(date, calendar.day_status(date)))
    }

    /// ウィザードの確定内容から予約リクエストを作成する
    ///
    /// 価格は選択された時間からサーバ側で導出し直す。
    pub async fn submit_request(
        &self,
        draft: BookingDraft,
    ) -> Result<BookingRequest, ServiceError> {
        self.ensure_parties_exist(&draft).await?;
        let tier = recommended_tier(draft.time_range.duration_hours()).ok_or_else(|| {
            ServiceError::Validation("no pricing tier suits the requested duration".to_owned())
        })?;

        let _guard = self.locks.acquire(draft.performer_id).await;
        let calendar = self.load_calendar(draft.performer_id).await?;
        if calendar.day_status(draft.date) != DayStatus::Available {
            return Err(ServiceError::InvalidTransition);
        }

        let id = ID_GENERATOR.generate::<BookingRequestId>().await;
        let mut request = BookingRequest::create(
            id,
            draft.performer_id,
            draft.venue_id,
            draft.event_type,
            draft.date,
            draft.time_range,
            tier.price,
            draft.contact,
            Utc::now(),
        )?;
        let mut requests = self.requests.clone();
        requests.save(&mut request).await?;
        info!("予約リクエストを作成: {}", id);
        Ok(request)
    }

    /// 予約リクエストに回答する
    ///
    /// 承諾時は同一演者のロック内で対象日を予約済みへ更新する。
    /// 同じ日への並行した承諾は一方だけが成功する。
    pub async fn respond(
        &self,
        request_id: BookingRequestId,
        decision: BookingDecision,
    ) -> Result<BookingRequest, ServiceError> {
        let mut requests = self.requests.clone();
        let request = requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| ServiceError::Validation("booking request not found".to_owned()))?;

        let _guard = self.locks.acquire(request.performer_id()).await;
        // ロック取得後に読み直してから判定する
        let mut request = requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| ServiceError::Validation("booking request not found".to_owned()))?;

        match decision {
            BookingDecision::Accepted => {
                request.accept()?;
                let mut calendars = self.calendars.clone();
                let mut calendar = self.load_calendar(request.performer_id()).await?;
                calendar.mark_booked(request.date())?;
                calendars
                    .save(&mut calendar)
                    .await
                    .map_err(write_conflict_to_slot_error)?;
                requests.save(&mut request).await?;
                info!("予約リクエストを承諾: {}", request_id);
            }
            BookingDecision::Declined => {
                // 辞退してもカレンダーは変更しない
                request.decline()?;
                requests.save(&mut request).await?;
                info!("予約リクエストを辞退: {}", request_id);
            }
        }
        Ok(request)
    }

    /// 予約リクエストを作成日時の降順でページングして返す
    pub async fn list_requests(
        &self,
        performer_id: PerformerId,
        page: u32,
        page_size: u32,
    ) -> Result<BookingRequestPage, ServiceError> {
        if page == 0 {
            return Err(ServiceError::Validation("page must be 1 or greater".to_owned()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ServiceError::Validation(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(self.query.list(performer_id, page, page_size).await?)
    }

    async fn load_calendar(&self, performer_id: PerformerId) -> Result<Calendar, ServiceError> {
        let calendar = self.calendars.find_by_id(performer_id).await?;
        Ok(calendar.unwrap_or_else(|| Calendar::open(performer_id)))
    }

    async fn ensure_parties_exist(&self, draft: &BookingDraft) -> Result<(), ServiceError> {
        let performer = timeout(
            self.directory_timeout,
            self.directory.performer_exists(draft.performer_id),
        )
        .await
        .map_err(|_| ServiceError::UpstreamUnavailable)?
        .map_err(upstream_error)?;
        if !performer {
            return Err(ServiceError::Validation("unknown performer".to_owned()));
        }
        let venue = timeout(
            self.directory_timeout,
            self.directory.venue_exists(draft.venue_id),
        )
        .await
        .map_err(|_| ServiceError::UpstreamUnavailable)?
        .map_err(upstream_error)?;
        if !venue {
            return Err(ServiceError::Validation("unknown venue".to_owned()));
        }
        Ok(())
    }
}

fn upstream_error(_: DataAccessError) -> ServiceError {
    ServiceError::UpstreamUnavailable
}

/// 楽観的並行性制御で負けた書き込みを枠の喪失として扱う
fn write_conflict_to_slot_error(error: DataAccessError) -> ServiceError {
    match error {
        DataAccessError::WriteConflict(_) => ServiceError::SlotNoLongerAvailable,
        e => ServiceError::DataAccess(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::core::{
        BookingDetails, BookingStatus, BookingWizard, ContactInfo, Money, TimeRange, VenueId,
        WizardState,
    };
    use crate::domain::Entity;
    use crate::infrastructure::memory::{MemoryPartyDirectory, MemoryRepository};

    type TestService = BookingService<
        MemoryRepository<Calendar>,
        MemoryRepository<BookingRequest>,
        MemoryRepository<BookingRequest>,
        MemoryPartyDirectory,
    >;

    fn service() -> TestService {
        let requests = MemoryRepository::<BookingRequest>::new();
        BookingService::new(
            MemoryRepository::<Calendar>::new(),
            requests.clone(),
            requests,
            MemoryPartyDirectory::new(),
        )
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn details() -> BookingDetails {
        BookingDetails {
            event_name: "Wedding".to_owned(),
            contact_name: "田中太郎".to_owned(),
            phone: "090-0000-0000".to_owned(),
        }
    }

    async fn submit_via_wizard(service: &TestService, performer: PerformerId) -> BookingRequest {
        let mut wizard = BookingWizard::new(performer, VenueId::from(2));
        let status = service
            .weekly_overview(performer, date("2024-07-01"))
            .await
            .unwrap()[0]
            .status;
        wizard.select_date(date("2024-07-01"), status).unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), status)
            .unwrap();
        wizard.select_tier("1-2 Hours").unwrap();
        wizard.enter_details(details()).unwrap();
        let draft = wizard.confirm().unwrap();
        let request = service.submit_request(draft).await.unwrap();
        wizard.complete().unwrap();
        assert_eq!(wizard.state(), &WizardState::Confirmed);
        request
    }

    #[tokio::test]
    async fn test_booking_scenario() {
        let service = service();
        let performer = PerformerId::from(1);
        service
            .set_day_status(performer, date("2024-07-01"), DayStatus::Available)
            .await
            .unwrap();

        let request = submit_via_wizard(&service, performer).await;
        assert_eq!(request.status(), BookingStatus::Pending);
        assert_eq!(request.price(), Money::usd(209));

        let page = service.list_requests(performer, 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, request.id());

        let accepted = service
            .respond(request.id(), BookingDecision::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.status(), BookingStatus::Accepted);

        let overview = service
            .weekly_overview(performer, date("2024-07-01"))
            .await
            .unwrap();
        assert_eq!(overview[0].status, DayStatus::Booked);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_for_same_day() {
        let service = Arc::new(service());
        let performer = PerformerId::from(1);
        service
            .set_day_status(performer, date("2024-07-01"), DayStatus::Available)
            .await
            .unwrap();

        let first = submit_via_wizard(&service, performer).await;
        let second = submit_via_wizard(&service, performer).await;

        let (a, b) = tokio::join!(
            service.respond(first.id(), BookingDecision::Accepted),
            service.respond(second.id(), BookingDecision::Accepted),
        );
        // 同じ日への並行した承諾はちょうど一方だけが成功する
        let failures = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::SlotNoLongerAvailable)))
            .count();
        assert_eq!(failures, 1);
        assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_second_response_is_rejected() {
        let service = service();
        let performer = PerformerId::from(1);
        service
            .set_day_status(performer, date("2024-07-01"), DayStatus::Available)
            .await
            .unwrap();
        let request = submit_via_wizard(&service, performer).await;

        service
            .respond(request.id(), BookingDecision::Declined)
            .await
            .unwrap();
        let result = service
            .respond(request.id(), BookingDecision::Accepted)
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidTransition)));

        // 辞退された日は空きのまま残る
        let overview = service
            .weekly_overview(performer, date("2024-07-01"))
            .await
            .unwrap();
        assert_eq!(overview[0].status, DayStatus::Available);
    }

    #[tokio::test]
    async fn test_submit_rejects_unavailable_day() {
        let service = service();
        let performer = PerformerId::from(1);
        service
            .set_day_status(performer, date("2024-07-01"), DayStatus::NotAvailable)
            .await
            .unwrap();

        // ウィザードを通らない下書きもサーバ側で拒否する
        let draft = BookingDraft {
            performer_id: performer,
            venue_id: VenueId::from(2),
            event_type: "Wedding".to_owned(),
            date: date("2024-07-01"),
            time_range: TimeRange::new(20, 22),
            price: Money::usd(209),
            tier_label: "1-2 Hours".to_owned(),
            contact: ContactInfo {
                name: "田中太郎".to_owned(),
                phone: "090-0000-0000".to_owned(),
            },
        };
        let result = service.submit_request(draft).await;
        assert!(matches!(result, Err(ServiceError::InvalidTransition)));
        let page = service.list_requests(performer, 1, 10).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_slow_directory_is_upstream_unavailable() {
        let requests = MemoryRepository::<BookingRequest>::new();
        let service = BookingService::new(
            MemoryRepository::<Calendar>::new(),
            requests.clone(),
            requests,
            MemoryPartyDirectory::new().with_latency(Duration::from_millis(50)),
        )
        .with_directory_timeout(Duration::from_millis(1));

        let performer = PerformerId::from(1);
        let mut wizard = BookingWizard::new(performer, VenueId::from(2));
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();
        wizard.select_tier("1-2 Hours").unwrap();
        wizard.enter_details(details()).unwrap();

        let result = service.submit_request(wizard.confirm().unwrap()).await;
        assert!(matches!(result, Err(ServiceError::UpstreamUnavailable)));
        // 入力済みの内容は保持され、再試行できる
        assert!(matches!(wizard.state(), WizardState::DetailsEntered { .. }));
        assert!(wizard.confirm().is_ok());
    }

    #[tokio::test]
    async fn test_list_pagination_and_validation() {
        let service = service();
        let performer = PerformerId::from(1);

        assert!(matches!(
            service.list_requests(performer, 0, 10).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.list_requests(performer, 1, 0).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.list_requests(performer, 1, MAX_PAGE_SIZE + 1).await,
            Err(ServiceError::Validation(_))
        ));

        service
            .set_range_status(
                performer,
                date("2024-07-01"),
                date("2024-07-03"),
                DayStatus::Available,
            )
            .await
            .unwrap();
        for _ in 0..3 {
            submit_via_wizard(&service, performer).await;
        }
        let page = service.list_requests(performer, 1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        let page = service.list_requests(performer, 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
