use chrono::NaiveDate;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use super::{
    recommended_tier, suitable_tiers, ContactInfo, DayStatus, Money, PerformerId, PricingTier,
    TimeRange, VenueId, PRICING_TIERS,
};

/// 予約ウィザードの入力詳細
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookingDetails {
    pub event_name: String,
    pub contact_name: String,
    pub phone: String,
}

/// 確定時に予約リクエストへ引き渡す内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub performer_id: PerformerId,
    pub venue_id: VenueId,
    pub event_type: String,
    pub date: NaiveDate,
    pub time_range: TimeRange,
    pub price: Money,
    pub tier_label: String,
    pub contact: ContactInfo,
}

/// ウィザードの状態
///
/// 日付 → 時間 → 料金ティア → 詳細 → 確定の一本道を前後にのみ遷移する。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WizardState {
    Idle,
    DateSelected {
        date: NaiveDate,
    },
    TimeSelected {
        date: NaiveDate,
        time_range: TimeRange,
    },
    TierSelected {
        date: NaiveDate,
        time_range: TimeRange,
        tier_label: String,
        price: Money,
    },
    DetailsEntered {
        date: NaiveDate,
        time_range: TimeRange,
        tier_label: String,
        price: Money,
        details: BookingDetails,
    },
    Confirmed,
}

/// 予約ウィザード
///
/// 呼び出し元セッション毎に1つ。共有されないためロック不要。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingWizard {
    performer_id: PerformerId,
    venue_id: VenueId,
    state: WizardState,
}

impl BookingWizard {
    pub fn new(performer_id: PerformerId, venue_id: VenueId) -> Self {
        Self {
            performer_id,
            venue_id,
            state: WizardState::Idle,
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    /// 日付を選択する
    ///
    /// 空きでない日付を選ぶとウィザードは初期状態に戻り、エラーを返す。
    pub fn select_date(
        &mut self,
        date: NaiveDate,
        status: DayStatus,
    ) -> Result<(), WizardError> {
        match &self.state {
            WizardState::Idle => {
                if status != DayStatus::Available {
                    self.state = WizardState::Idle;
                    return Err(WizardError::DateUnavailable);
                }
                self.state = WizardState::DateSelected { date };
                Ok(())
            }
            _ => Err(WizardError::InvalidStep),
        }
    }

    /// 時間帯を選択する
    ///
    /// 終了時刻は開始時刻より後で、選択済みの日が予約済みになっていないこと。
    pub fn select_time(
        &mut self,
        time_range: TimeRange,
        current_status: DayStatus,
    ) -> Result<(), WizardError> {
        match &self.state {
            WizardState::DateSelected { date } => {
                if time_range.start >= time_range.end || time_range.end > 24 {
                    return Err(WizardError::InvalidTimeRange);
                }
                if current_status != DayStatus::Available {
                    return Err(WizardError::DayNoLongerAvailable);
                }
                self.state = WizardState::TimeSelected {
                    date: *date,
                    time_range,
                };
                Ok(())
            }
            _ => Err(WizardError::InvalidStep),
        }
    }

    /// 選択中の時間に適合するティア一覧
    pub fn selectable_tiers(&self) -> Vec<&'static PricingTier> {
        match &self.state {
            WizardState::TimeSelected { time_range, .. } => {
                suitable_tiers(time_range.duration_hours())
            }
            _ => Vec::new(),
        }
    }

    /// 事前ハイライトするティア
    pub fn highlighted_tier(&self) -> Option<&'static PricingTier> {
        match &self.state {
            WizardState::TimeSelected { time_range, .. } => {
                recommended_tier(time_range.duration_hours())
            }
            _ => None,
        }
    }

    /// 料金ティアを選択する。時間に適合しないティアは選択できない
    pub fn select_tier(&mut self, label: &str) -> Result<(), WizardError> {
        match &self.state {
            WizardState::TimeSelected { date, time_range } => {
                let tier = PRICING_TIERS
                    .iter()
                    .find(|t| t.label == label)
                    .ok_or(WizardError::UnknownTier)?;
                if !tier.suitable(time_range.duration_hours()) {
                    return Err(WizardError::TierNotSuitable);
                }
                self.state = WizardState::TierSelected {
                    date: *date,
                    time_range: *time_range,
                    tier_label: tier.label.to_owned(),
                    price: tier.price,
                };
                Ok(())
            }
            _ => Err(WizardError::InvalidStep),
        }
    }

    /// イベント名・連絡先を入力する。全て必須
    pub fn enter_details(&mut self, details: BookingDetails) -> Result<(), WizardError> {
        match &self.state {
            WizardState::TierSelected {
                date,
                time_range,
                tier_label,
                price,
            } => {
                Self::validate_details(&details)?;
                self.state = WizardState::DetailsEntered {
                    date: *date,
                    time_range: *time_range,
                    tier_label: tier_label.clone(),
                    price: *price,
                    details,
                };
                Ok(())
            }
            _ => Err(WizardError::InvalidStep),
        }
    }

    /// 確定内容を引き渡す
    ///
    /// ウィザードの状態は変更しない。リクエスト作成が外部要因で失敗しても
    /// 入力済みの内容を保ったまま再試行できる。
    pub fn confirm(&self) -> Result<BookingDraft, WizardError> {
        match &self.state {
            WizardState::DetailsEntered {
                date,
                time_range,
                tier_label,
                price,
                details,
            } => Ok(BookingDraft {
                performer_id: self.performer_id,
                venue_id: self.venue_id,
                event_type: details.event_name.clone(),
                date: *date,
                time_range: *time_range,
                price: *price,
                tier_label: tier_label.clone(),
                contact: ContactInfo {
                    name: details.contact_name.clone(),
                    phone: details.phone.clone(),
                },
            }),
            _ => Err(WizardError::InvalidStep),
        }
    }

    /// リクエスト作成が完了した後に呼び、ウィザードを終了状態にする
    pub fn complete(&mut self) -> Result<(), WizardError> {
        match &self.state {
            WizardState::DetailsEntered { .. } => {
                self.state = WizardState::Confirmed;
                Ok(())
            }
            _ => Err(WizardError::InvalidStep),
        }
    }

    /// 一つ前のステップに戻る
    pub fn back(&mut self) -> Result<(), WizardError> {
        self.state = match &self.state {
            WizardState::DateSelected { .. } => WizardState::Idle,
            WizardState::TimeSelected { date, .. } => WizardState::DateSelected { date: *date },
            WizardState::TierSelected {
                date, time_range, ..
            } => WizardState::TimeSelected {
                date: *date,
                time_range: *time_range,
            },
            WizardState::DetailsEntered {
                date,
                time_range,
                tier_label,
                price,
                ..
            } => WizardState::TierSelected {
                date: *date,
                time_range: *time_range,
                tier_label: tier_label.clone(),
                price: *price,
            },
            WizardState::Idle | WizardState::Confirmed => return Err(WizardError::InvalidStep),
        };
        Ok(())
    }

    /// ウィザードを中断して初期状態に戻す
    ///
    /// ウィザード内の入力のみ破棄する。カレンダーや台帳には影響しない。
    pub fn cancel(&mut self) -> Result<(), WizardError> {
        match &self.state {
            WizardState::Confirmed => Err(WizardError::InvalidStep),
            _ => {
                self.state = WizardState::Idle;
                Ok(())
            }
        }
    }

    fn validate_details(details: &BookingDetails) -> Result<(), WizardError> {
        if details.event_name.trim().is_empty() {
            return Err(WizardError::EventNameRequired);
        }
        if details.contact_name.trim().is_empty() {
            return Err(WizardError::ContactNameRequired);
        }
        if details.phone.trim().is_empty() {
            return Err(WizardError::PhoneRequired);
        }
        Ok(())
    }
}

/// 予約ウィザードのエラー
#[derive(Error, Display, Debug)]
pub enum WizardError {
    /// 現在のステップでは実行できない操作です
    #[display(fmt = "The operation is not allowed in the current step")]
    InvalidStep,
    /// 空きのない日付です
    #[display(fmt = "The date is not available")]
    DateUnavailable,
    /// 日付が予約済みになりました
    #[display(fmt = "The day is no longer available")]
    DayNoLongerAvailable,
    /// 時間帯が不正です
    #[display(fmt = "Invalid time range")]
    InvalidTimeRange,
    /// 不明なティアです
    #[display(fmt = "Unknown pricing tier")]
    UnknownTier,
    /// 時間に適合しないティアです
    #[display(fmt = "The tier does not suit the selected duration")]
    TierNotSuitable,
    /// イベント名が入力されていません
    #[display(fmt = "Event name is required")]
    EventNameRequired,
    /// 連絡先の名前が入力されていません
    #[display(fmt = "Contact name is required")]
    ContactNameRequired,
    /// 電話番号が入力されていません
    #[display(fmt = "Phone number is required")]
    PhoneRequired,
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn wizard() -> BookingWizard {
        BookingWizard::new(PerformerId::from(1), VenueId::from(2))
    }

    #[test]
    fn test_full_path_to_draft() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();
        assert_eq!(wizard.highlighted_tier().unwrap().label, "1-2 Hours");
        wizard.select_tier("1-2 Hours").unwrap();
        wizard.enter_details(details()).unwrap();

        let draft = wizard.confirm().unwrap();
        assert_eq!(draft.date, date("2024-07-01"));
        assert_eq!(draft.time_range, TimeRange::new(20, 22));
        assert_eq!(draft.price, Money::usd(209));
        assert_eq!(draft.event_type, "Wedding");

        wizard.complete().unwrap();
        assert_eq!(wizard.state(), &WizardState::Confirmed);
    }

    #[test]
    fn test_unavailable_date_resets_to_idle() {
        let mut wizard = wizard();
        let result = wizard.select_date(date("2024-07-01"), DayStatus::Booked);
        assert!(matches!(result, Err(WizardError::DateUnavailable)));
        assert_eq!(wizard.state(), &WizardState::Idle);
    }

    #[test]
    fn test_time_guards() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();

        assert!(matches!(
            wizard.select_time(TimeRange::new(22, 20), DayStatus::Available),
            Err(WizardError::InvalidTimeRange)
        ));
        assert!(matches!(
            wizard.select_time(TimeRange::new(20, 22), DayStatus::Booked),
            Err(WizardError::DayNoLongerAvailable)
        ));
        // 失敗しても選択済みの日付は保持される
        assert_eq!(
            wizard.state(),
            &WizardState::DateSelected {
                date: date("2024-07-01")
            }
        );
    }

    #[test]
    fn test_tier_must_suit_duration() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();

        assert!(matches!(
            wizard.select_tier("4-8 Hours"),
            Err(WizardError::TierNotSuitable)
        ));
        assert!(matches!(
            wizard.select_tier("30 Minutes"),
            Err(WizardError::UnknownTier)
        ));
        let labels: Vec<_> = wizard.selectable_tiers().iter().map(|t| t.label).collect();
        assert_eq!(labels, vec!["1-2 Hours"]);
    }

    #[test]
    fn test_details_are_required() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();
        wizard.select_tier("1-2 Hours").unwrap();

        let mut missing = details();
        missing.phone = " ".to_owned();
        assert!(matches!(
            wizard.enter_details(missing),
            Err(WizardError::PhoneRequired)
        ));
        assert!(wizard.confirm().is_err());
    }

    #[test]
    fn test_back_walks_the_path_backwards() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();
        wizard.select_tier("1-2 Hours").unwrap();
        wizard.enter_details(details()).unwrap();

        wizard.back().unwrap();
        assert!(matches!(wizard.state(), WizardState::TierSelected { .. }));
        wizard.back().unwrap();
        assert!(matches!(wizard.state(), WizardState::TimeSelected { .. }));
        wizard.back().unwrap();
        assert!(matches!(wizard.state(), WizardState::DateSelected { .. }));
        wizard.back().unwrap();
        assert_eq!(wizard.state(), &WizardState::Idle);
        assert!(wizard.back().is_err());
    }

    #[test]
    fn test_cancel_discards_wizard_state_only() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();
        wizard.cancel().unwrap();
        assert_eq!(wizard.state(), &WizardState::Idle);
    }

    #[test]
    fn test_confirm_preserves_state_for_retry() {
        let mut wizard = wizard();
        wizard
            .select_date(date("2024-07-01"), DayStatus::Available)
            .unwrap();
        wizard
            .select_time(TimeRange::new(20, 22), DayStatus::Available)
            .unwrap();
        wizard.select_tier("1-2 Hours").unwrap();
        wizard.enter_details(details()).unwrap();

        // リクエスト作成の失敗を想定して2回引き出す
        let first = wizard.confirm().unwrap();
        let second = wizard.confirm().unwrap();
        assert_eq!(first, second);
        assert!(matches!(wizard.state(), WizardState::DetailsEntered { .. }));
    }
}
