use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::FinderError;
use crate::utils::keyed_lock::KeyedLock;
use crate::utils::persist;

/// A record stored one-per-file, keyed by disease id.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// In-memory map of records mirrored to `<dir>/<key>.json`.
///
/// Every write is a load-modify-persist transaction under a per-key async
/// mutex; the in-memory row only changes after the file write succeeded.
#[derive(Debug)]
pub struct JsonTable<T> {
    name: &'static str,
    dir: PathBuf,
    rows: RwLock<BTreeMap<String, T>>,
    locks: KeyedLock,
}

impl<T> JsonTable<T>
where
    T: Keyed + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Loads every readable record under `dir`. Unreadable files are logged and skipped.
    pub async fn open(name: &'static str, dir: &Path) -> Result<Self, FinderError> {
        let mut rows = BTreeMap::new();
        for path in persist::json_files(dir).await? {
            match persist::load_json::<T>(&path).await {
                Ok(Some(row)) => {
                    rows.insert(row.key().to_string(), row);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(table = name, path = %path.display(), error = %err, "Skipping unreadable record");
                }
            }
        }
        debug!(table = name, rows = rows.len(), "Opened table");
        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            rows: RwLock::new(rows),
            locks: KeyedLock::new(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", persist::file_stem(key)))
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.rows.read().await.get(key.trim()).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.rows.read().await.contains_key(key.trim())
    }

    /// All rows ordered by key.
    pub async fn all(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.rows.read().await.keys().cloned().collect()
    }

    /// Runs `f` on the row for `key` (created with `init` when absent) and
    /// persists the result. Nothing is written when `f` fails.
    pub async fn mutate<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> T,
        f: impl FnOnce(&mut T) -> Result<R, FinderError>,
    ) -> Result<R, FinderError> {
        let key = key.trim();
        let _guard = self.locks.lock(key).await;
        let current = self.rows.read().await.get(key).cloned();
        let mut row = current.unwrap_or_else(init);
        let out = f(&mut row)?;
        persist::save_json(&self.path_for(key), &row).await?;
        self.rows.write().await.insert(key.to_string(), row);
        Ok(out)
    }

    /// Like [`JsonTable::mutate`] but fails with `NotFound` for an absent row.
    pub async fn mutate_existing<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut T) -> Result<R, FinderError>,
    ) -> Result<R, FinderError> {
        let key = key.trim();
        let _guard = self.locks.lock(key).await;
        let Some(mut row) = self.rows.read().await.get(key).cloned() else {
            return Err(FinderError::not_found(self.name, key));
        };
        let out = f(&mut row)?;
        persist::save_json(&self.path_for(key), &row).await?;
        self.rows.write().await.insert(key.to_string(), row);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        n: u32,
    }

    impl Keyed for Row {
        fn key(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn mutate_persists_and_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = JsonTable::<Row>::open("row", dir.path()).await.expect("open");
        table
            .mutate("X:1", || Row { id: "X:1".into(), n: 0 }, |row| {
                row.n += 1;
                Ok(())
            })
            .await
            .expect("mutate");

        let reopened = JsonTable::<Row>::open("row", dir.path()).await.expect("reopen");
        assert_eq!(reopened.get("X:1").await, Some(Row { id: "X:1".into(), n: 1 }));
        assert!(dir.path().join("X_1.json").exists());
    }

    #[tokio::test]
    async fn failed_mutation_leaves_row_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = JsonTable::<Row>::open("row", dir.path()).await.expect("open");
        table
            .mutate("a", || Row { id: "a".into(), n: 5 }, |_| Ok(()))
            .await
            .expect("seed");

        let err = table
            .mutate_existing("a", |row| {
                row.n = 99;
                Err::<(), _>(FinderError::Conflict("nope".into()))
            })
            .await
            .expect_err("should fail");
        assert!(matches!(err, FinderError::Conflict(_)));
        assert_eq!(table.get("a").await.map(|r| r.n), Some(5));
    }

    #[tokio::test]
    async fn mutate_existing_reports_missing_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = JsonTable::<Row>::open("row", dir.path()).await.expect("open");
        let err = table
            .mutate_existing("nope", |_| Ok(()))
            .await
            .expect_err("missing");
        assert!(matches!(err, FinderError::NotFound { .. }));
        assert!(table.all().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_mutations_do_not_lose_updates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = std::sync::Arc::new(JsonTable::<Row>::open("row", dir.path()).await.expect("open"));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table
                    .mutate("k", || Row { id: "k".into(), n: 0 }, |row| {
                        row.n += 1;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("mutate");
        }
        assert_eq!(table.get("k").await.map(|r| r.n), Some(16));
    }
}
