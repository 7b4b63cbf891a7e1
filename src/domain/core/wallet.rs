use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::{Money, PerformerId};

/// チャージ額の下限・上限(通貨単位)
pub const TOP_UP_MIN: u64 = 500;
pub const TOP_UP_MAX: u64 = 100000;

/// ウォレットのリポジトリトレイト
#[async_trait]
pub trait WalletRepository {
    /// 演者IDからウォレットを取得する
    async fn find_by_id(&self, id: PerformerId) -> Result<Option<Wallet>, DataAccessError>;
    /// ウォレットを保存する
    async fn save(&mut self, entity: &mut Wallet) -> Result<bool, DataAccessError>;
}

/// 取引ID
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct TransactionId(u64);

impl Id for TransactionId {
    type Inner = u64;
}

/// 取引種別
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// 入金
    Credit,
    /// 出金
    Debit,
}

/// ウォレットの取引
///
/// 一度追加された取引は変更されない。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub date: DateTime<Utc>,
    pub description: String,
}

/// ウォレットのイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEvent {
    /// ウォレットが開設された
    WalletOpened { id: PerformerId },
    /// 入金された
    Credited {
        id: PerformerId,
        transaction: Transaction,
    },
    /// 出金された
    Debited {
        id: PerformerId,
        transaction: Transaction,
    },
}

impl Event for WalletEvent {
    type Id = PerformerId;
}

/// 演者毎のウォレット
///
/// 残高は常に全取引の合計と一致し、負にならない。
#[derive(Debug, Default, Clone, IntoIterator, Serialize, Deserialize)]
pub struct Wallet {
    id: PerformerId,
    balance: Money,
    transactions: Vec<Transaction>,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<WalletEvent>,
}

impl Wallet {
    pub fn open(id: PerformerId) -> Self {
        let mut entity = Self {
            id,
            ..Default::default()
        };
        entity.events.push(WalletEvent::WalletOpened { id });
        entity
    }

    /// ウォレットにチャージする
    ///
    /// 額が範囲外の場合は取引を追加せずに失敗する。
    pub fn top_up(
        &mut self,
        transaction_id: TransactionId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Transaction, WalletError> {
        self.validate_top_up(&amount)?;
        let transaction = Transaction {
            id: transaction_id,
            kind: TransactionKind::Credit,
            amount,
            date: now,
            description: "Wallet top-up".to_owned(),
        };
        self.credit(transaction.clone());
        self.events.push(WalletEvent::Credited {
            id: self.id,
            transaction: transaction.clone(),
        });
        Ok(transaction)
    }

    /// 成立した予約のプラットフォーム手数料を差し引く
    ///
    /// 残高が不足する場合は取引を追加せずに失敗する。
    pub fn charge_booking_fee(
        &mut self,
        transaction_id: TransactionId,
        booking_price: Money,
        now: DateTime<Utc>,
    ) -> Result<Transaction, WalletError> {
        let fee = booking_fee(booking_price);
        self.validate_debit(&fee)?;
        let transaction = Transaction {
            id: transaction_id,
            kind: TransactionKind::Debit,
            amount: fee,
            date: now,
            description: format!("Platform fee for booking ({})", booking_price),
        };
        self.debit(transaction.clone());
        self.events.push(WalletEvent::Debited {
            id: self.id,
            transaction: transaction.clone(),
        });
        Ok(transaction)
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// 取引履歴から残高を再計算する。監査用
    pub fn audited_balance(&self) -> Option<Money> {
        self.transactions
            .iter()
            .try_fold(Money::default(), |acc, t| match t.kind {
                TransactionKind::Credit => acc.checked_add(t.amount),
                TransactionKind::Debit => acc.checked_sub(t.amount),
            })
    }

    fn credit(&mut self, transaction: Transaction) {
        if let Some(balance) = self.balance.checked_add(transaction.amount) {
            self.balance = balance;
            self.transactions.push(transaction);
        }
    }

    fn debit(&mut self, transaction: Transaction) {
        if let Some(balance) = self.balance.checked_sub(transaction.amount) {
            self.balance = balance;
            self.transactions.push(transaction);
        }
    }

    fn validate_id(&self, id: &PerformerId) -> Result<(), WalletError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(WalletError::MismatchedId),
        }
    }

    fn validate_currency(&self, amount: &Money) -> Result<(), WalletError> {
        match self.balance.currency() == amount.currency() {
            true => Ok(()),
            false => Err(WalletError::MismatchedCurrency),
        }
    }

    fn validate_top_up(&self, amount: &Money) -> Result<(), WalletError> {
        self.validate_currency(amount)?;
        match (TOP_UP_MIN..=TOP_UP_MAX).contains(&amount.amount()) {
            true => Ok(()),
            false => Err(WalletError::AmountOutOfRange),
        }
    }

    fn validate_debit(&self, amount: &Money) -> Result<(), WalletError> {
        self.validate_currency(amount)?;
        match self.balance.checked_sub(*amount) {
            Some(_) => Ok(()),
            None => Err(WalletError::InsufficientFunds),
        }
    }
}

/// 予約価格の区分に応じたプラットフォーム手数料
pub fn booking_fee(booking_price: Money) -> Money {
    let fee = match booking_price.amount() {
        0..=4000 => 100,
        4001..=7000 => 200,
        _ => 300,
    };
    Money::new(fee, booking_price.currency())
}

impl Entity for Wallet {
    type Id = PerformerId;

    const ENTITY_NAME: &'static str = "wallet";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Wallet {
    type Event = WalletEvent;
    type Error = WalletError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            WalletEvent::WalletOpened { .. } => Ok(()),
            WalletEvent::Credited { id, transaction } => {
                self.validate_id(id)?;
                self.validate_top_up(&transaction.amount)
            }
            WalletEvent::Debited { id, transaction } => {
                self.validate_id(id)?;
                self.validate_debit(&transaction.amount)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            WalletEvent::WalletOpened { id } => {
                if self.id != id {
                    *self = Self::open(id);
                }
            }
            WalletEvent::Credited { id, transaction } => {
                if self.id == id {
                    self.credit(transaction);
                }
            }
            WalletEvent::Debited { id, transaction } => {
                if self.id == id {
                    self.debit(transaction);
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

impl PartialEq for Wallet {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.balance == other.balance
            && self.transactions == other.transactions
    }
}

impl Eq for Wallet {}

/// ウォレットのエラー
#[derive(Error, Display, Debug)]
pub enum WalletError {
    /// IDが一致しません
    #[display(fmt = "ID does not match")]
    MismatchedId,
    /// 通貨が一致しません
    #[display(fmt = "Currency does not match")]
    MismatchedCurrency,
    /// チャージ額が範囲外です
    #[display(fmt = "Top-up amount is out of range")]
    AmountOutOfRange,
    /// 残高が不足しています
    #[display(fmt = "Insufficient funds")]
    InsufficientFunds,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_with_balance(amount: u64) -> Wallet {
        let mut wallet = Wallet::open(PerformerId::from(1));
        if amount > 0 {
            wallet
                .top_up(TransactionId::from(1), Money::usd(amount), Utc::now())
                .unwrap();
        }
        wallet
    }

    #[test]
    fn test_top_up_bounds() {
        let mut wallet = wallet_with_balance(0);

        assert!(matches!(
            wallet.top_up(TransactionId::from(2), Money::usd(499), Utc::now()),
            Err(WalletError::AmountOutOfRange)
        ));
        assert!(matches!(
            wallet.top_up(TransactionId::from(3), Money::usd(100001), Utc::now()),
            Err(WalletError::AmountOutOfRange)
        ));
        assert_eq!(wallet.balance(), Money::usd(0));
        assert!(wallet.transactions().is_empty());

        wallet
            .top_up(TransactionId::from(4), Money::usd(500), Utc::now())
            .unwrap();
        wallet
            .top_up(TransactionId::from(5), Money::usd(100000), Utc::now())
            .unwrap();
        assert_eq!(wallet.balance(), Money::usd(100500));
        assert_eq!(wallet.transactions().len(), 2);
    }

    #[test]
    fn test_booking_fee_brackets() {
        assert_eq!(booking_fee(Money::usd(1000)), Money::usd(100));
        assert_eq!(booking_fee(Money::usd(4000)), Money::usd(100));
        assert_eq!(booking_fee(Money::usd(4001)), Money::usd(200));
        assert_eq!(booking_fee(Money::usd(5000)), Money::usd(200));
        assert_eq!(booking_fee(Money::usd(7000)), Money::usd(200));
        assert_eq!(booking_fee(Money::usd(7001)), Money::usd(300));
    }

    #[test]
    fn test_top_up_and_fee_scenario() {
        let mut wallet = wallet_with_balance(12000);

        let credit = wallet
            .top_up(TransactionId::from(10), Money::usd(2000), Utc::now())
            .unwrap();
        assert_eq!(credit.kind, TransactionKind::Credit);
        assert_eq!(wallet.balance(), Money::usd(14000));

        let debit = wallet
            .charge_booking_fee(TransactionId::from(11), Money::usd(5000), Utc::now())
            .unwrap();
        assert_eq!(debit.kind, TransactionKind::Debit);
        assert_eq!(debit.amount, Money::usd(200));
        assert_eq!(wallet.balance(), Money::usd(13800));
        assert_eq!(wallet.transactions().len(), 3);
    }

    #[test]
    fn test_insufficient_funds() {
        let mut wallet = wallet_with_balance(0);
        let result =
            wallet.charge_booking_fee(TransactionId::from(2), Money::usd(5000), Utc::now());
        assert!(matches!(result, Err(WalletError::InsufficientFunds)));
        assert_eq!(wallet.balance(), Money::usd(0));
        assert!(wallet.transactions().is_empty());
    }

    #[test]
    fn test_balance_matches_transaction_history() {
        let mut wallet = wallet_with_balance(12000);
        wallet
            .top_up(TransactionId::from(20), Money::usd(700), Utc::now())
            .unwrap();
        wallet
            .charge_booking_fee(TransactionId::from(21), Money::usd(7001), Utc::now())
            .unwrap();
        assert_eq!(wallet.audited_balance(), Some(wallet.balance()));
    }

    #[test]
    fn test_rehydrate_from_events() {
        let mut source = wallet_with_balance(12000);
        source
            .charge_booking_fee(TransactionId::from(30), Money::usd(1000), Utc::now())
            .unwrap();

        let mut replayed = Wallet::default();
        for event in source.pop_all() {
            replayed.apply(event);
        }
        replayed.clear();
        assert_eq!(replayed, source);
    }
}
