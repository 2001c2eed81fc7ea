use async_trait::async_trait;
use tokio::sync::Mutex;

use siteguard_core::domain::{MemoryEntry, MemoryScope};
use siteguard_core::errors::StoreError;
use siteguard_core::memory::{AppendOutcome, MemoryStore};

#[derive(Default)]
pub struct InMemoryMemoryStore {
    user: Mutex<Vec<MemoryEntry>>,
    organization: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store without the duplicate check; intended for fixtures.
    pub fn with_entries(entries: impl IntoIterator<Item = MemoryEntry>) -> Self {
        let mut user = Vec::new();
        let mut organization = Vec::new();
        for entry in entries {
            match entry.scope {
                MemoryScope::User => user.push(entry),
                MemoryScope::Organization => organization.push(entry),
            }
        }
        Self { user: Mutex::new(user), organization: Mutex::new(organization) }
    }

    fn scope(&self, scope: MemoryScope) -> &Mutex<Vec<MemoryEntry>> {
        match scope {
            MemoryScope::User => &self.user,
            MemoryScope::Organization => &self.organization,
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn read(&self, scope: MemoryScope) -> Result<Vec<MemoryEntry>, StoreError> {
        let entries = self.scope(scope).lock().await;
        Ok(entries.clone())
    }

    async fn append_unique(&self, entry: MemoryEntry) -> Result<AppendOutcome, StoreError> {
        let mut entries = self.scope(entry.scope).lock().await;
        if entries.iter().any(|existing| existing.normalized_key == entry.normalized_key) {
            return Ok(AppendOutcome::Duplicate);
        }
        entries.push(entry);
        Ok(AppendOutcome::Appended)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use siteguard_core::domain::{MemoryCategory, MemoryEntry, MemoryScope};
    use siteguard_core::memory::{AppendOutcome, MemoryStore};

    use super::InMemoryMemoryStore;

    fn entry(content: &str, scope: MemoryScope) -> MemoryEntry {
        MemoryEntry::new(content, MemoryCategory::Location, scope, Utc::now())
    }

    #[tokio::test]
    async fn scopes_are_kept_apart() {
        let store = InMemoryMemoryStore::new();
        store.append_unique(entry("Manages Site Alpha", MemoryScope::User)).await.expect("append user");
        store
            .append_unique(entry("Site Alpha crane is rated 20 t", MemoryScope::Organization))
            .await
            .expect("append org");

        assert_eq!(store.read(MemoryScope::User).await.expect("read").len(), 1);
        assert_eq!(store.read(MemoryScope::Organization).await.expect("read").len(), 1);
        assert_eq!(store.read_all().await.expect("read all").len(), 2);
    }

    #[tokio::test]
    async fn duplicate_keys_are_not_appended() {
        let store = InMemoryMemoryStore::new();
        let first = store.append_unique(entry("Manages Site Alpha", MemoryScope::User)).await;
        let second = store.append_unique(entry("  manages site alpha!", MemoryScope::User)).await;

        assert_eq!(first.expect("first"), AppendOutcome::Appended);
        assert_eq!(second.expect("second"), AppendOutcome::Duplicate);
        assert_eq!(store.read(MemoryScope::User).await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn same_fact_in_another_scope_is_not_a_duplicate() {
        let store = InMemoryMemoryStore::with_entries([entry("Manages Site Alpha", MemoryScope::User)]);
        let outcome = store.append_unique(entry("Manages Site Alpha", MemoryScope::Organization)).await;
        assert_eq!(outcome.expect("append"), AppendOutcome::Appended);
    }
}
