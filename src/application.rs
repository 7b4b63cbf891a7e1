pub mod booking;
pub mod wallet;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use derive_more::{Display, Error};
use tokio::sync::OwnedMutexGuard;

use crate::domain::core::{
    BookingRequestError, CalendarError, PerformerId, WalletError, WizardError,
};
use crate::domain::DataAccessError;

/// アプリケーションサービスのエラー
///
/// 全て呼び出し元で回復可能なエラーで、部分的な書き込みは残さない。
#[derive(Error, Display, Debug)]
pub enum ServiceError {
    /// 入力が不正です
    #[display(fmt = "Validation error: {}", _0)]
    Validation(#[error(not(source))] String),
    /// 現在の状態では実行できない操作です
    #[display(fmt = "Invalid transition")]
    InvalidTransition,
    /// 対象の枠は利用できなくなりました
    #[display(fmt = "Slot no longer available")]
    SlotNoLongerAvailable,
    /// ウォレットの残高が不足しています
    #[display(fmt = "Insufficient funds")]
    InsufficientFunds,
    /// 外部サービスが利用できません
    #[display(fmt = "Upstream service unavailable")]
    UpstreamUnavailable,
    /// データアクセスに失敗しました
    #[display(fmt = "Data access error: {}", _0)]
    DataAccess(#[error(source)] DataAccessError),
}

impl From<DataAccessError> for ServiceError {
    fn from(value: DataAccessError) -> Self {
        ServiceError::DataAccess(value)
    }
}

impl From<CalendarError> for ServiceError {
    fn from(value: CalendarError) -> Self {
        match value {
            CalendarError::DayAlreadyBooked => ServiceError::SlotNoLongerAvailable,
            e => ServiceError::Validation(e.to_string()),
        }
    }
}

impl From<BookingRequestError> for ServiceError {
    fn from(value: BookingRequestError) -> Self {
        match value {
            BookingRequestError::InvalidTransition => ServiceError::InvalidTransition,
            e => ServiceError::Validation(e.to_string()),
        }
    }
}

impl From<WalletError> for ServiceError {
    fn from(value: WalletError) -> Self {
        match value {
            WalletError::InsufficientFunds => ServiceError::InsufficientFunds,
            e => ServiceError::Validation(e.to_string()),
        }
    }
}

impl From<WizardError> for ServiceError {
    fn from(value: WizardError) -> Self {
        match value {
            WizardError::DayNoLongerAvailable => ServiceError::SlotNoLongerAvailable,
            WizardError::InvalidStep => ServiceError::InvalidTransition,
            e => ServiceError::Validation(e.to_string()),
        }
    }
}

/// 演者毎の操作を直列化するためのロック
///
/// カレンダー更新・予約承諾・ウォレット取引は同一演者について
/// 読み取り・変更・書き込みを1つずつ通す。
#[derive(Default)]
pub struct PerformerLocks {
    locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl PerformerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: PerformerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("performer lock map poisoned");
            locks
                .entry(*id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
