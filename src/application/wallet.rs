use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::core::{
    Money, PerformerId, Transaction, TransactionId, Wallet, WalletRepository,
};
use crate::domain::ID_GENERATOR;

use super::{PerformerLocks, ServiceError};

/// ウォレット操作の種別
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletAction {
    TopUp,
    ChargeFee,
}

/// ウォレット取引の結果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletReceipt {
    pub new_balance: Money,
    pub transaction: Transaction,
}

/// ウォレットを扱うアプリケーションサービス
///
/// 同一演者の残高の読み取り・変更・書き込みは直列化する。
pub struct WalletService<W> {
    wallets: W,
    locks: PerformerLocks,
}

impl<W> WalletService<W>
where
    W: WalletRepository + Clone + Send + Sync,
{
    pub fn new(wallets: W) -> Self {
        Self {
            wallets,
            locks: PerformerLocks::new(),
        }
    }

    /// 残高と全取引履歴を返す
    pub async fn wallet(&self, performer_id: PerformerId) -> Result<Wallet, ServiceError> {
        Ok(self.load_wallet(performer_id).await?)
    }

    /// ウォレットにチャージする
    pub async fn top_up(
        &self,
        performer_id: PerformerId,
        amount: Money,
    ) -> Result<WalletReceipt, ServiceError> {
        let _guard = self.locks.acquire(performer_id).await;
        let mut wallets = self.wallets.clone();
        let mut wallet = self.load_wallet(performer_id).await?;
        let transaction_id = ID_GENERATOR.generate::<TransactionId>().await;
        let transaction = wallet.top_up(transaction_id, amount, Utc::now())?;
        wallets.save(&mut wallet).await?;
        info!("ウォレットにチャージ: {} {}", performer_id, amount);
        Ok(WalletReceipt {
            new_balance: wallet.balance(),
            transaction,
        })
    }

    /// 成立した予約のプラットフォーム手数料を差し引く
    pub async fn charge_booking_fee(
        &self,
        performer_id: PerformerId,
        booking_price: Money,
    ) -> Result<WalletReceipt, ServiceError> {
        let _guard = self.locks.acquire(performer_id).await;
        let mut wallets = self.wallets.clone();
        let mut wallet = self.load_wallet(performer_id).await?;
        let transaction_id = ID_GENERATOR.generate::<TransactionId>().await;
        let transaction = wallet.charge_booking_fee(transaction_id, booking_price, Utc::now())?;
        wallets.save(&mut wallet).await?;
        info!("手数料を請求: {} {}", performer_id, transaction.amount);
        Ok(WalletReceipt {
            new_balance: wallet.balance(),
            transaction,
        })
    }

    async fn load_wallet(&self, performer_id: PerformerId) -> Result<Wallet, ServiceError> {
        let wallet = self.wallets.find_by_id(performer_id).await?;
        Ok(wallet.unwrap_or_else(|| Wallet::open(performer_id)))
    }
}
