use std::fmt;
use std::ops::Range;

use chrono::NaiveDate;
use intervaltree::IntervalTree;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{Currency, DayStatus, Money};

/// 開始・終了時刻の組(0〜24時の正時)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u32,
    pub end: u32,
}

impl TimeRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn duration_hours(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start, self.end)
    }
}

/// 料金ティア
///
/// `suitable` の境界は半開区間 `min_hours < duration <= max_hours` で統一する。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PricingTier {
    pub label: &'static str,
    pub min_hours: u32,
    pub max_hours: u32,
    pub price: Money,
    pub recommended: bool,
}

impl PricingTier {
    pub fn suitable(&self, duration_hours: u32) -> bool {
        self.min_hours < duration_hours && duration_hours <= self.max_hours
    }
}

/// 固定の料金ティアカタログ
pub static PRICING_TIERS: Lazy<Vec<PricingTier>> = Lazy::new(|| {
    vec![
        PricingTier {
            label: "1 Hour",
            min_hours: 0,
            max_hours: 1,
            price: Money::new(119, Currency::USD),
            recommended: false,
        },
        PricingTier {
            label: "1-2 Hours",
            min_hours: 1,
            max_hours: 2,
            price: Money::new(209, Currency::USD),
            recommended: true,
        },
        PricingTier {
            label: "2-4 Hours",
            min_hours: 2,
            max_hours: 4,
            price: Money::new(449, Currency::USD),
            recommended: false,
        },
        PricingTier {
            label: "4-8 Hours",
            min_hours: 4,
            max_hours: 8,
            price: Money::new(1049, Currency::USD),
            recommended: false,
        },
    ]
});

/// 夜間の候補時間枠(時刻は0〜24時)
static EVENING_WINDOWS: [Range<u32>; 3] = [18..20, 20..22, 22..24];

/// 空き日から導出される予約可能な時間枠
///
/// 永続化しない。必要になる度に再生成する。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookingSlot {
    pub date: NaiveDate,
    pub start: u32,
    pub end: u32,
    pub duration_hours: u32,
    pub price: Money,
    pub tier_label: String,
}

/// 時間に適合するティアを返す
pub fn suitable_tiers(duration_hours: u32) -> Vec<&'static PricingTier> {
    PRICING_TIERS
        .iter()
        .filter(|t| t.suitable(duration_hours))
        .collect()
}

/// 適合するティアのうち推奨のもの、無ければ先頭
pub fn recommended_tier(duration_hours: u32) -> Option<&'static PricingTier> {
    let tiers = suitable_tiers(duration_hours);
    tiers
        .iter()
        .find(|t| t.recommended)
        .copied()
        .or_else(|| tiers.first().copied())
}

/// 指定日の予約可能な時間枠を導出する
///
/// 空き以外の日は空リスト。同じ呼び出しは常に同じ結果を返し、状態を変更しない。
/// 互いに重なる時間枠は導出されない。
pub fn bookable_slots(date: NaiveDate, status: DayStatus) -> Vec<BookingSlot> {
    if status != DayStatus::Available {
        return Vec::new();
    }
    let mut slots: Vec<BookingSlot> = Vec::new();
    for window in EVENING_WINDOWS.iter() {
        let taken: IntervalTree<u32, ()> = slots.iter().map(|s| (s.start..s.end, ())).collect();
        if taken.query(window.clone()).next().is_some() {
            continue;
        }
        let duration_hours = window.end - window.start;
        let tier = match recommended_tier(duration_hours) {
            Some(tier) => tier,
            None => continue,
        };
        slots.push(BookingSlot {
            date,
            start: window.start,
            end: window.end,
            duration_hours,
            price: tier.price,
            tier_label: tier.label.to_owned(),
        });
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_slots_for_available_day() {
        let slots = bookable_slots(date("2024-07-01"), DayStatus::Available);
        assert_eq!(slots.len(), 3);
        let evening = &slots[1];
        assert_eq!(evening.start, 20);
        assert_eq!(evening.end, 22);
        assert_eq!(evening.duration_hours, 2);
        assert_eq!(evening.price, Money::usd(209));
        assert_eq!(evening.tier_label, "1-2 Hours");
    }

    #[test]
    fn test_slots_for_closed_days() {
        assert!(bookable_slots(date("2024-07-01"), DayStatus::NotAvailable).is_empty());
        assert!(bookable_slots(date("2024-07-01"), DayStatus::Booked).is_empty());
    }

    #[test]
    fn test_slot_derivation_is_idempotent() {
        let first = bookable_slots(date("2024-07-01"), DayStatus::Available);
        let second = bookable_slots(date("2024-07-01"), DayStatus::Available);
        assert_eq!(first, second);
    }

    #[test]
    fn test_slots_never_overlap() {
        let slots = bookable_slots(date("2024-07-01"), DayStatus::Available);
        for (i, a) in slots.iter().enumerate() {
            for b in slots.iter().skip(i + 1) {
                assert!(a.end <= b.start || b.end <= a.start);
            }
        }
    }

    #[test]
    fn test_suitability_boundaries() {
        // duration = 2 は "1-2 Hours" のみに適合する
        let tiers = suitable_tiers(2);
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].label, "1-2 Hours");

        // duration = 1 は "1 Hour" のみに適合する
        let tiers = suitable_tiers(1);
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].label, "1 Hour");

        // カタログの範囲外
        assert!(suitable_tiers(9).is_empty());
    }

    #[test]
    fn test_recommended_tier() {
        assert_eq!(recommended_tier(2).unwrap().label, "1-2 Hours");
        assert_eq!(recommended_tier(3).unwrap().label, "2-4 Hours");
        assert_eq!(recommended_tier(9), None);
    }
}
