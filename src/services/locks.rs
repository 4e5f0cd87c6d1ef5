//! Per-asset mutual exclusion

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per asset id.
///
/// Every read-decide-commit sequence that depends on an asset's availability
/// or reservation calendar runs while holding that asset's guard. Different
/// assets never contend.
#[derive(Clone, Default)]
pub struct AssetLocks {
    inner: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl AssetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, asset_id: i32) -> OwnedMutexGuard<()> {
        // Clone the Arc out first so the shard guard is released before awaiting
        let mutex = self.inner.entry(asset_id).or_default().clone();
        mutex.lock_owned().await
    }
}
