use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Autocomplete suggestions keyed by owner and field name.
///
/// Entries are filled lazily on read. Anything that writes cards for an owner
/// must call [`SuggestionCache::invalidate`] so stale lists are not served.
///
/// A reader takes a [`SuggestionCache::generation`] before querying the database
/// and hands it back to [`SuggestionCache::put`]. A put whose generation predates
/// an invalidation for that owner is dropped.
#[derive(Clone, Default)]
pub struct SuggestionCache {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<(String, String), Vec<String>>,
    generation: u64,
    invalidated_at: HashMap<String, u64>,
    cleared_at: u64,
}

impl Inner {
    fn is_current(&self, owner_id: &str, generation: u64) -> bool {
        let owner = self.invalidated_at.get(owner_id).copied().unwrap_or(0);
        generation >= owner.max(self.cleared_at)
    }
}

impl SuggestionCache {
    pub async fn get(&self, owner_id: &str, field: &str) -> Option<Vec<String>> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(&(owner_id.to_string(), field.to_string()))
            .cloned()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Stores `values` unless the owner was invalidated after `generation` was taken.
    /// Returns whether the entry was kept.
    pub async fn put(&self, owner_id: &str, field: &str, generation: u64, values: Vec<String>) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.is_current(owner_id, generation) {
            tracing::debug!(owner_id, field, "Dropping suggestions read before an invalidation");
            return false;
        }
        inner
            .entries
            .insert((owner_id.to_string(), field.to_string()), values);
        true
    }

    pub async fn invalidate(&self, owner_id: &str) {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        let generation = inner.generation;
        inner.invalidated_at.insert(owner_id.to_string(), generation);
        inner.entries.retain(|(owner, _), _| owner != owner_id);
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.generation += 1;
        inner.cleared_at = inner.generation;
        inner.invalidated_at.clear();
        inner.entries.clear();
    }
}
