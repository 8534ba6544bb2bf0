use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Key the bearer token is persisted under.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: key required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO kv (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .with_context(|| format!("storage: write {key}"))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("storage: read {key}"))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .with_context(|| format!("storage: delete {key}"))?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("posts-tui").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn put_get_remove() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        store.put(ACCESS_TOKEN_KEY, "first").unwrap();
        store.put(ACCESS_TOKEN_KEY, "second").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("second"));
        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = Store::open(Options {
                path: Some(path.clone()),
            })
            .unwrap();
            store.put(REFRESH_TOKEN_KEY, "r1").unwrap();
            store.close().unwrap();
        }
        let store = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
    }
}
