mod booking_request;
mod calendar;
mod slot;
mod wallet;
mod wizard;

use std::fmt;

use async_trait::async_trait;
use derive_more::{Deref, Display, From};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::domain::{DataAccessError, Id};

pub use self::booking_request::*;
pub use self::calendar::*;
pub use self::slot::*;
pub use self::wallet::*;
pub use self::wizard::*;

/// コアドメインのイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreEvent {
    CalendarEvent(CalendarEvent),
    BookingRequestEvent(BookingRequestEvent),
    WalletEvent(WalletEvent),
}

/// 演者ID
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct PerformerId(u64);

impl Id for PerformerId {
    type Inner = u64;
}

/// 会場ID
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct VenueId(u64);

impl Id for VenueId {
    type Inner = u64;
}

/// 演者・会場ディレクトリ(外部サービス)への参照
#[async_trait]
pub trait PartyDirectory {
    /// 演者が存在するか確認する
    async fn performer_exists(&self, id: PerformerId) -> Result<bool, DataAccessError>;
    /// 会場が存在するか確認する
    async fn venue_exists(&self, id: VenueId) -> Result<bool, DataAccessError>;
}

/// 通貨
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Currency {
    #[default]
    USD,
    JPY,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::JPY => "¥",
        }
    }
}

/// 金額
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Money {
    amount: u64,
    currency: Currency,
}

impl Money {
    pub const fn new(amount: u64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub const fn usd(amount: u64) -> Self {
        Self::new(amount, Currency::USD)
    }

    pub const fn amount(&self) -> u64 {
        self.amount
    }

    pub const fn currency(&self) -> Currency {
        self.currency
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        Some(Money::new(self.amount.checked_add(other.amount)?, self.currency))
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        Some(Money::new(self.amount.checked_sub(other.amount)?, self.currency))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.currency.symbol(),
            self.amount.to_formatted_string(&Locale::en)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        let price = Money::new(1000000, Currency::JPY);
        assert_eq!(format!("{}", price), "¥1,000,000");
    }

    #[test]
    fn test_money_checked_ops() {
        let a = Money::usd(500);
        let b = Money::usd(200);
        assert_eq!(a.checked_add(b), Some(Money::usd(700)));
        assert_eq!(a.checked_sub(b), Some(Money::usd(300)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(a.checked_add(Money::new(1, Currency::JPY)), None);
    }
}
