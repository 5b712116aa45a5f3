use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// 使われていないロックを掃除する閾値
const PRUNE_THRESHOLD: usize = 1024;

/// ユーザー単位の排他ロック
///
/// 「読み込み → コード検証 → 書き込み」を同一ユーザーについて直列化する。
/// プロセスをまたぐ競合は保存時の version 検査で検出する。
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定ユーザーのロックを取得（解放はガードの drop）
    pub async fn lock(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(user_id).or_default().clone()
        };

        lock.lock_owned().await
    }
}
