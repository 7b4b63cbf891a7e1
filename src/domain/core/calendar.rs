use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use derive_more::{Display, Error, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue};

use super::PerformerId;

/// 空き状況カレンダーのリポジトリトレイト
#[async_trait]
pub trait CalendarRepository {
    /// 演者IDからカレンダーを取得する
    async fn find_by_id(&self, id: PerformerId) -> Result<Option<Calendar>, DataAccessError>;
    /// カレンダーを保存する
    async fn save(&mut self, entity: &mut Calendar) -> Result<bool, DataAccessError>;
}

/// 日毎の空き状況
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    /// 空き
    #[default]
    Available,
    /// 不可
    NotAvailable,
    /// 予約済み
    Booked,
}

/// カレンダーのイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalendarEvent {
    /// カレンダーが開設された
    CalendarOpened { id: PerformerId },
    /// 日毎の空き状況が設定された
    DayStatusSet {
        id: PerformerId,
        date: NaiveDate,
        status: DayStatus,
    },
    /// 期間の空き状況が一括設定された
    RangeStatusSet {
        id: PerformerId,
        start: NaiveDate,
        end: NaiveDate,
        status: DayStatus,
    },
}

impl Event for CalendarEvent {
    type Id = PerformerId;
}

/// 演者毎の空き状況カレンダー
#[derive(Debug, Clone, Default, IntoIterator, Serialize, Deserialize)]
pub struct Calendar {
    id: PerformerId,
    days: BTreeMap<NaiveDate, DayStatus>,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<CalendarEvent>,
}

/// 表示用に日付と空き状況を組にしたもの
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOverview {
    pub date: NaiveDate,
    pub status: DayStatus,
}

impl Calendar {
    pub fn open(id: PerformerId) -> Self {
        let mut entity = Self {
            id,
            ..Default::default()
        };
        entity.events.push(CalendarEvent::CalendarOpened { id });
        entity
    }

    /// 一日分の空き状況を上書きする
    pub fn set_day_status(&mut self, date: NaiveDate, status: DayStatus) {
        self.days.insert(date, status);
        self.events.push(CalendarEvent::DayStatusSet {
            id: self.id,
            date,
            status,
        });
    }

    /// 期間内の全日付の空き状況を上書きする
    ///
    /// 予約済みの日も含めて上書きする。範囲が不正な場合は一切書き込まない。
    pub fn set_range_status(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        status: DayStatus,
    ) -> Result<(), CalendarError> {
        self.validate_range(&start, &end)?;
        let mut date = start;
        while date <= end {
            self.days.insert(date, status);
            date = date + Duration::days(1);
        }
        self.events.push(CalendarEvent::RangeStatusSet {
            id: self.id,
            start,
            end,
            status,
        });
        Ok(())
    }

    /// 予約確定時に日付を予約済みにする
    ///
    /// 既に予約済みの日付は失敗する。
    pub fn mark_booked(&mut self, date: NaiveDate) -> Result<(), CalendarError> {
        self.validate_not_booked(&date)?;
        self.set_day_status(date, DayStatus::Booked);
        Ok(())
    }

    /// 指定日の空き状況を返す。未設定の日は空きとして扱う
    pub fn day_status(&self, date: NaiveDate) -> DayStatus {
        self.days.get(&date).copied().unwrap_or_default()
    }

    /// 設定済みの全日付
    pub fn days(&self) -> impl Iterator<Item = DayOverview> + '_ {
        self.days.iter().map(|(date, status)| DayOverview {
            date: *date,
            status: *status,
        })
    }

    /// 基準日を含む週(月曜始まり)の7日分の空き状況
    pub fn weekly_overview(&self, reference: NaiveDate) -> Vec<DayOverview> {
        let monday = reference - Duration::days(reference.weekday().num_days_from_monday() as i64);
        (0..7)
            .map(|i| {
                let date = monday + Duration::days(i);
                DayOverview {
                    date,
                    status: self.day_status(date),
                }
            })
            .collect()
    }

    fn validate_id(&self, id: &PerformerId) -> Result<(), CalendarError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(CalendarError::MismatchedId),
        }
    }

    fn validate_range(&self, start: &NaiveDate, end: &NaiveDate) -> Result<(), CalendarError> {
        match start <= end {
            true => Ok(()),
            false => Err(CalendarError::InvalidDateRange),
        }
    }

    fn validate_not_booked(&self, date: &NaiveDate) -> Result<(), CalendarError> {
        match self.day_status(*date) {
            DayStatus::Booked => Err(CalendarError::DayAlreadyBooked),
            _ => Ok(()),
        }
    }
}

impl Entity for Calendar {
    type Id = PerformerId;

    const ENTITY_NAME: &'static str = "calendar";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Calendar {
    type Event = CalendarEvent;
    type Error = CalendarError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            CalendarEvent::CalendarOpened { .. } => Ok(()),
            CalendarEvent::DayStatusSet { id, .. } => self.validate_id(id),
            CalendarEvent::RangeStatusSet { id, start, end, .. } => {
                self.validate_id(id)?;
                self.validate_range(start, end)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CalendarEvent::CalendarOpened { id } => {
                if self.id != id {
                    *self = Self::open(id);
                }
            }
            CalendarEvent::DayStatusSet { id, date, status } => {
                if self.id == id {
                    self.set_day_status(date, status);
                }
            }
            CalendarEvent::RangeStatusSet {
                id,
                start,
                end,
                status,
            } => {
                if self.id == id {
                    if let Err(_e) = self.set_range_status(start, end, status) {}
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

impl PartialEq for Calendar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.days == other.days
    }
}

impl Eq for Calendar {}

/// カレンダーのエラー
#[derive(Error, Display, Debug)]
pub enum CalendarError {
    /// IDが一致しません
    #[display(fmt = "ID does not match")]
    MismatchedId,
    /// 開始日が終了日より後です
    #[display(fmt = "Start date is after end date")]
    InvalidDateRange,
    /// 既に予約済みの日付です
    #[display(fmt = "The day is already booked")]
    DayAlreadyBooked,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_day_status_read_after_write() {
        let mut calendar = Calendar::open(PerformerId::from(1));
        assert_eq!(calendar.day_status(date("2024-07-01")), DayStatus::Available);

        calendar.set_day_status(date("2024-07-01"), DayStatus::NotAvailable);
        assert_eq!(
            calendar.day_status(date("2024-07-01")),
            DayStatus::NotAvailable
        );

        calendar.set_day_status(date("2024-07-01"), DayStatus::Booked);
        assert_eq!(calendar.day_status(date("2024-07-01")), DayStatus::Booked);
    }

    #[test]
    fn test_range_overwrites_booked_days() {
        let mut calendar = Calendar::open(PerformerId::from(1));
        calendar.set_day_status(date("2024-07-02"), DayStatus::Booked);

        calendar
            .set_range_status(date("2024-07-01"), date("2024-07-05"), DayStatus::Available)
            .unwrap();
        let mut day = date("2024-07-01");
        while day <= date("2024-07-05") {
            assert_eq!(calendar.day_status(day), DayStatus::Available);
            day = day + Duration::days(1);
        }
    }

    #[test]
    fn test_invalid_range_writes_nothing() {
        let mut calendar = Calendar::open(PerformerId::from(1));
        let result =
            calendar.set_range_status(date("2024-07-05"), date("2024-07-01"), DayStatus::Booked);
        assert!(matches!(result, Err(CalendarError::InvalidDateRange)));
        let mut day = date("2024-07-01");
        while day <= date("2024-07-05") {
            assert_eq!(calendar.day_status(day), DayStatus::Available);
            day = day + Duration::days(1);
        }
    }

    #[test]
    fn test_mark_booked_rejects_booked_day() {
        let mut calendar = Calendar::open(PerformerId::from(1));
        calendar.mark_booked(date("2024-07-01")).unwrap();
        assert_eq!(calendar.day_status(date("2024-07-01")), DayStatus::Booked);
        assert!(matches!(
            calendar.mark_booked(date("2024-07-01")),
            Err(CalendarError::DayAlreadyBooked)
        ));
    }

    #[test]
    fn test_weekly_overview_contains_reference_week() {
        let mut calendar = Calendar::open(PerformerId::from(1));
        calendar.set_day_status(date("2024-07-03"), DayStatus::Booked);

        // 2024-07-03 は水曜日
        let week = calendar.weekly_overview(date("2024-07-03"));
        assert_eq!(week.len(), 7);
        assert_eq!(week[0].date, date("2024-07-01"));
        assert_eq!(week[6].date, date("2024-07-07"));
        assert_eq!(week[2].status, DayStatus::Booked);
        assert_eq!(week[0].status, DayStatus::Available);
    }

    #[test]
    fn test_rehydrate_from_events() {
        let mut source = Calendar::open(PerformerId::from(7));
        source.set_day_status(date("2024-07-01"), DayStatus::NotAvailable);
        source
            .set_range_status(date("2024-07-10"), date("2024-07-12"), DayStatus::Booked)
            .unwrap();

        let mut replayed = Calendar::default();
        for event in source.pop_all() {
            replayed.apply(event);
        }
        replayed.clear();
        assert_eq!(replayed, source);
    }
}
