use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const MEMORY_URL: &str = "sqlite::memory:";

/// Key-value store of JSON documents in a single SQLite table.
///
/// Writes go through one async mutex so read-modify-write updates never
/// interleave. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    writes: Arc<Mutex<()>>,
}

impl Store {
    /// Opens the database named by `url` (for example
    /// `sqlite://microblog.db`), creating the file and the table if needed.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let memory = url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {}", url))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = if memory {
            // every connection to :memory: is its own database, so keep exactly one alive
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            SqlitePoolOptions::new()
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await
        }
        .with_context(|| format!("failed to open SQLite database at {}", url))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv table")?;

        Ok(Self {
            pool,
            writes: Arc::new(Mutex::new(())),
        })
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::connect(MEMORY_URL).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read {}", key))?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                Ok(Some(
                    serde_json::from_str(&raw).with_context(|| format!("decoding {}", key))?,
                ))
            }
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let raw = serde_json::to_string(value)?;
        let _guard = self.writes.lock().await;
        upsert(&self.pool, key, &raw).await
    }

    /// Read-modify-write of a single key, starting from `T::default()` when
    /// the key is absent.
    pub async fn update_json<T, F>(&self, key: &str, f: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let updated = self
            .read_modify_write(key, |current: Option<T>| {
                let mut current = current.unwrap_or_default();
                f(&mut current);
                Some(current)
            })
            .await?;
        updated.context("update produced no value")
    }

    /// Applies `f` to the stored value only if the key exists. Returns the
    /// updated value, or `None` when there was nothing to update.
    pub async fn modify_json<T, F>(&self, key: &str, f: F) -> anyhow::Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        self.read_modify_write(key, |current: Option<T>| {
            let mut current = current?;
            f(&mut current);
            Some(current)
        })
        .await
    }

    async fn read_modify_write<T, F>(&self, key: &str, f: F) -> anyhow::Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let _guard = self.writes.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("failed to read {}", key))?;
        let current = match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                Some(serde_json::from_str(&raw).with_context(|| format!("decoding {}", key))?)
            }
            None => None,
        };

        let updated = f(current);
        if let Some(value) = &updated {
            let raw = serde_json::to_string(value)?;
            upsert(&mut *tx, key, &raw).await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.writes.lock().await;
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete {}", key))?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read {}", key))?;
        Ok(row.is_some())
    }

    /// All keys starting with `prefix`, in key order.
    pub async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list keys under {}", prefix))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(Into::into))
            .collect()
    }
}

async fn upsert<'e, E>(executor: E, key: &str, raw: &str) -> anyhow::Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO kv (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(raw)
    .execute(executor)
    .await
    .with_context(|| format!("failed to write {}", key))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = Store::in_memory().await.unwrap();
        store.set_json("k", &vec!["a".to_string()]).await.unwrap();
        let got: Option<Vec<String>> = store.get_json("k").await.unwrap();
        assert_eq!(got, Some(vec!["a".to_string()]));
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
        assert!(store.get_json::<Vec<String>>("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_starts_from_default() {
        let store = Store::in_memory().await.unwrap();
        let list: Vec<String> = store
            .update_json("list", |l: &mut Vec<String>| l.push("x".to_string()))
            .await
            .unwrap();
        assert_eq!(list, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn modify_skips_missing_keys() {
        let store = Store::in_memory().await.unwrap();
        let missing: Option<u32> = store.modify_json("n", |n: &mut u32| *n += 1).await.unwrap();
        assert_eq!(missing, None);
        assert!(!store.exists("n").await.unwrap());

        store.set_json("n", &1u32).await.unwrap();
        let updated = store.modify_json("n", |n: &mut u32| *n += 1).await.unwrap();
        assert_eq!(updated, Some(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_updates_are_not_lost() {
        let store = Store::in_memory().await.unwrap();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_json("list", |l: &mut Vec<u32>| l.push(i))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let list: Vec<u32> = store.get_json("list").await.unwrap().unwrap();
        assert_eq!(list.len(), 20);
    }

    #[tokio::test]
    async fn prefix_listing() {
        let store = Store::in_memory().await.unwrap();
        store.set_json("token:a", &1).await.unwrap();
        store.set_json("token:b", &2).await.unwrap();
        store.set_json("tokens", &3).await.unwrap();
        store.set_json("user:a", &4).await.unwrap();
        assert_eq!(
            store.keys_with_prefix("token:").await.unwrap(),
            vec!["token:a".to_string(), "token:b".to_string()]
        );
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("microblog.db").display());
        {
            let store = Store::connect(&url).await.unwrap();
            store.set_json("greeting", &"hello").await.unwrap();
            store.pool.close().await;
        }
        let reopened = Store::connect(&url).await.unwrap();
        let got: Option<String> = reopened.get_json("greeting").await.unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
    }
}
