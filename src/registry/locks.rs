use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-asset async locks serializing payload writes within this process.
///
/// Two uploads to one asset would otherwise derive the same payload path for
/// the same next version.
#[derive(Default)]
pub(crate) struct AssetLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub(crate) struct AssetGuard<'a> {
    locks: &'a AssetLocks,
    id: String,
    entry: Arc<AsyncMutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl AssetLocks {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) async fn lock(&self, id: &str) -> AssetGuard<'_> {
        let entry = self.map().entry(id.to_string()).or_default().clone();
        let guard = entry.clone().lock_owned().await;
        AssetGuard {
            locks: self,
            id: id.to_string(),
            entry,
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

impl Drop for AssetGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // The map, this guard's entry and the owned guard hold one each.
        if Arc::strong_count(&self.entry) == 3 {
            map.remove(&self.id);
        }
    }
}
