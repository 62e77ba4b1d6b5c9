//! Persisted allow-list of user/chat ids that may use the bot beyond the owner
//! and the statically configured groups.

use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::PathBuf,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{errors::Error, Result};

/// Storage port for the allow-list.
///
/// `save` always replaces the whole collection; `add` is load + insert + save.
#[async_trait]
pub trait AllowListStore: Send + Sync {
    async fn load(&self) -> Result<BTreeSet<i64>>;

    async fn save(&self, ids: &BTreeSet<i64>) -> Result<()>;

    /// Returns `true` if the id was not present before.
    async fn add(&self, id: i64) -> Result<bool>;
}

/// JSON-array file store (`[123, 456]`).
///
/// Writes go through a sibling temp file + rename. Writers are serialized
/// within the process; two processes sharing the file are still last-write-wins.
#[derive(Debug)]
pub struct JsonFileAllowList {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileAllowList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// `None` when the file does not exist yet.
    async fn read_ids(&self) -> Result<Option<BTreeSet<i64>>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::persistence(&self.path, e)),
        };

        // Duplicates in a hand-edited file collapse into the set.
        let ids: Vec<i64> =
            serde_json::from_str(&raw).map_err(|e| Error::persistence(&self.path, e))?;
        Ok(Some(ids.into_iter().collect()))
    }

    /// Caller must hold `write_lock`.
    async fn write_atomic(&self, ids: &BTreeSet<i64>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::persistence(parent, e))?;
        }
        let body = serde_json::to_string(ids)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::persistence(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::persistence(&self.path, e))
    }
}

#[async_trait]
impl AllowListStore for JsonFileAllowList {
    async fn load(&self) -> Result<BTreeSet<i64>> {
        if let Some(ids) = self.read_ids().await? {
            return Ok(ids);
        }

        let _guard = self.write_lock.lock().await;
        // Another writer may have created the file while we waited.
        match self.read_ids().await? {
            Some(ids) => Ok(ids),
            None => {
                let empty = BTreeSet::new();
                self.write_atomic(&empty).await?;
                Ok(empty)
            }
        }
    }

    async fn save(&self, ids: &BTreeSet<i64>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic(ids).await
    }

    async fn add(&self, id: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut ids = self.read_ids().await?.unwrap_or_default();
        if !ids.insert(id) {
            return Ok(false);
        }
        self.write_atomic(&ids).await?;
        Ok(true)
    }
}

/// Non-persistent store (tests, ephemeral deployments).
#[derive(Debug, Default)]
pub struct MemoryAllowList {
    ids: Mutex<BTreeSet<i64>>,
}

impl MemoryAllowList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: Mutex::new(ids.into_iter().collect()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<i64>>> {
        self.ids
            .lock()
            .map_err(|_| Error::persistence("<memory>", "allow-list lock poisoned"))
    }
}

#[async_trait]
impl AllowListStore for MemoryAllowList {
    async fn load(&self) -> Result<BTreeSet<i64>> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, ids: &BTreeSet<i64>) -> Result<()> {
        *self.lock()? = ids.clone();
        Ok(())
    }

    async fn add(&self, id: i64) -> Result<bool> {
        Ok(self.lock()?.insert(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/gtb-{prefix}-{pid}-{ts}/authorized_users.json"))
    }

    #[tokio::test]
    async fn load_creates_missing_file_with_empty_array() {
        let path = tmp_file("create");
        let store = JsonFileAllowList::new(&path);

        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let path = tmp_file("idem");
        let store = JsonFileAllowList::new(&path);

        assert!(store.add(555).await.unwrap());
        let once = fs::read_to_string(&path).unwrap();
        assert!(!store.add(555).await.unwrap());
        let twice = fs::read_to_string(&path).unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.load().await.unwrap(), BTreeSet::from([555]));
    }

    #[tokio::test]
    async fn save_of_load_keeps_contents() {
        let path = tmp_file("roundtrip");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[3, 1, 2, 1]").unwrap();
        let store = JsonFileAllowList::new(&path);

        let before = store.load().await.unwrap();
        store.save(&before).await.unwrap();
        let after = store.load().await.unwrap();

        assert_eq!(before, after);
        assert_eq!(after, BTreeSet::from([1, 2, 3]));
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let path = tmp_file("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        let store = JsonFileAllowList::new(&path);

        assert!(matches!(store.load().await, Err(Error::Persistence { .. })));
        assert!(matches!(store.add(1).await, Err(Error::Persistence { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_in_one_process_are_not_lost() {
        let path = tmp_file("race");
        let store = Arc::new(JsonFileAllowList::new(&path));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.add(1000 + i).await.unwrap() })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap());
        }

        assert_eq!(store.load().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn memory_store_add_is_idempotent() {
        let store = MemoryAllowList::default();
        assert!(store.add(7).await.unwrap());
        assert!(!store.add(7).await.unwrap());
        assert_eq!(store.load().await.unwrap(), BTreeSet::from([7]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_memory_adds_are_not_lost() {
        let store = Arc::new(MemoryAllowList::default());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.add(i).await.unwrap() })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap());
        }

        assert_eq!(store.load().await.unwrap().len(), 64);
    }
}
