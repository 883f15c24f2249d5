//! Persistence of the repository catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::{Repo, StoreError};

/// Persistent catalog of repositories.
#[async_trait]
pub trait Store: Send + Sync {
    /// Live (not soft-deleted) repositories of the given kinds; every kind
    /// when `kinds` is empty.
    async fn list_repos(&self, kinds: &[String]) -> Result<Vec<Repo>, StoreError>;

    /// Insert repositories with a zero ID and overwrite the rest.
    ///
    /// Inserted repositories get their assigned ID written back.
    async fn upsert_repos(&self, repos: &mut [Repo]) -> Result<(), StoreError>;

    /// Begin a transaction, or `None` when the store has no transactions.
    async fn transact(&self) -> Result<Option<Box<dyn Transaction>>, StoreError> {
        Ok(None)
    }
}

/// A store handle whose writes become visible only on commit.
#[async_trait]
pub trait Transaction: Store {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
struct Table {
    next_id: u32,
    rows: BTreeMap<u32, Repo>,
}

impl Table {
    fn list(&self, kinds: &[String]) -> Vec<Repo> {
        self.rows
            .values()
            .filter(|r| r.deleted_at.is_none())
            .filter(|r| kinds.is_empty() || kinds.iter().any(|k| k.eq_ignore_ascii_case(r.kind())))
            .cloned()
            .collect()
    }

    fn upsert(&mut self, repos: &mut [Repo]) -> Result<(), StoreError> {
        // Check first so a failed upsert leaves the table untouched.
        if let Some(missing) = repos
            .iter()
            .find(|r| r.id != 0 && !self.rows.contains_key(&r.id))
        {
            return Err(StoreError::NotFound(missing.id));
        }

        for repo in repos.iter_mut() {
            if repo.id == 0 {
                self.next_id += 1;
                repo.id = self.next_id;
                trace!(id = repo.id, name = %repo.name, "inserted repo");
            }
            self.rows.insert(repo.id, repo.clone());
        }
        Ok(())
    }
}

/// In-process store with transaction support.
///
/// A transaction holds the table lock until it finishes, so transactions
/// are serialised with each other and with plain reads and writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: Arc<Mutex<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, soft-deleted ones included.
    pub async fn all_repos(&self) -> Vec<Repo> {
        self.table.lock().await.rows.values().cloned().collect()
    }

    pub async fn get_repo(&self, id: u32) -> Option<Repo> {
        self.table.lock().await.rows.get(&id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_repos(&self, kinds: &[String]) -> Result<Vec<Repo>, StoreError> {
        Ok(self.table.lock().await.list(kinds))
    }

    async fn upsert_repos(&self, repos: &mut [Repo]) -> Result<(), StoreError> {
        self.table.lock().await.upsert(repos)
    }

    async fn transact(&self) -> Result<Option<Box<dyn Transaction>>, StoreError> {
        let guard = Arc::clone(&self.table).lock_owned().await;
        let working = guard.clone();
        Ok(Some(Box::new(MemoryTransaction {
            guard,
            working: Mutex::new(working),
        })))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Table>,
    working: Mutex<Table>,
}

#[async_trait]
impl Store for MemoryTransaction {
    async fn list_repos(&self, kinds: &[String]) -> Result<Vec<Repo>, StoreError> {
        Ok(self.working.lock().await.list(kinds))
    }

    async fn upsert_repos(&self, repos: &mut [Repo]) -> Result<(), StoreError> {
        self.working.lock().await.upsert(repos)
    }

    // Nested transactions are not supported; callers run inside this one.
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working.into_inner();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn upsert_assigns_ids_and_overwrites() {
        let store = MemoryStore::new();
        let mut repos = vec![Repo::new("a"), Repo::new("b")];
        store.upsert_repos(&mut repos).await.unwrap();
        assert_eq!((repos[0].id, repos[1].id), (1, 2));

        repos[0].description = "changed".into();
        store.upsert_repos(&mut repos[..1]).await.unwrap();
        assert_eq!(store.get_repo(1).await.unwrap().description, "changed");
        assert_eq!(store.all_repos().await.len(), 2);
    }

    #[tokio::test]
    async fn upsert_of_unknown_id_fails_without_writing() {
        let store = MemoryStore::new();
        let mut ghost = Repo::new("ghost");
        ghost.id = 42;
        let mut repos = vec![Repo::new("a"), ghost];

        let err = store.upsert_repos(&mut repos).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
        assert!(store.all_repos().await.is_empty());
    }

    #[tokio::test]
    async fn list_hides_soft_deleted_rows() {
        let store = MemoryStore::new();
        let mut gone = Repo::new("gone");
        gone.deleted_at = Some(Utc::now());
        store
            .upsert_repos(&mut [Repo::new("live"), gone])
            .await
            .unwrap();

        let listed = store.list_repos(&[]).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "live");
        assert_eq!(store.all_repos().await.len(), 2);
    }

    #[tokio::test]
    async fn transaction_commit_and_rollback() {
        let store = MemoryStore::new();

        let tx = store.transact().await.unwrap().unwrap();
        tx.upsert_repos(&mut [Repo::new("discarded")]).await.unwrap();
        assert_eq!(tx.list_repos(&[]).await.unwrap().len(), 1);
        tx.rollback().await.unwrap();
        assert!(store.all_repos().await.is_empty());

        let tx = store.transact().await.unwrap().unwrap();
        tx.upsert_repos(&mut [Repo::new("kept")]).await.unwrap();
        tx.commit().await.unwrap();
        let rows = store.all_repos().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "kept");
    }
}
