use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rusqlite::{ffi, params, Connection, OptionalExtension};

use crate::error::StorageError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    embedding_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL
)";

/// Persistence for enrollment credentials.
///
/// Records are insert-only. `add_user` is the authoritative uniqueness check,
/// `username_exists` is only a fast path ahead of the expensive stages.
pub trait CredentialStore {
    fn username_exists(&self, username: &str) -> Result<bool, StorageError>;

    fn add_user(
        &self,
        username: &str,
        password_hash: &str,
        embedding_hash: &str,
    ) -> Result<(), StorageError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for &T {
    fn username_exists(&self, username: &str) -> Result<bool, StorageError> {
        (**self).username_exists(username)
    }

    fn add_user(
        &self,
        username: &str,
        password_hash: &str,
        embedding_hash: &str,
    ) -> Result<(), StorageError> {
        (**self).add_user(username, password_hash, embedding_hash)
    }
}

pub struct SqliteCredentialStore {
    conn: Connection,
}

impl SqliteCredentialStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Prepare {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!("opened credential store {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    pub fn user_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn username_exists(&self, username: &str) -> Result<bool, StorageError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_user(
        &self,
        username: &str,
        password_hash: &str,
        embedding_hash: &str,
    ) -> Result<(), StorageError> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        // dropping an uncommitted transaction rolls it back
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO users (username, password_hash, embedding_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, password_hash, embedding_hash, created_at],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                warn!("insert for user {} hit the uniqueness constraint", username);
                return Err(StorageError::Duplicate {
                    username: username.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;

        info!("stored credential for user {}", username);
        Ok(())
    }
}
