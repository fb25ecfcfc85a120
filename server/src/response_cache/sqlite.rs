//! SQLite implementation of the ResponseStore trait

use crate::http::{ResponseDescriptor, ResponseType};
use crate::response_cache::hash::{sha256, verify};
use crate::response_cache::{
    RequestKey, ResponseStore, StoreError, decode_headers, encode_headers,
};
use axum::http::StatusCode;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed implementation of ResponseStore
#[derive(Clone)]
pub struct SqliteResponseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteResponseStore {
    /// Open (or create) the store at `db_path`
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.pragma_update(None, "foreign_keys", "ON")?;

        // One row per cache version
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS partitions (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Stored responses, keyed by partition + request identity
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                partition TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                response_type TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                sha256 TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (partition, method, url),
                FOREIGN KEY (partition) REFERENCES partitions(name) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        info!("Response store schema initialized");
        Ok(())
    }

    fn ensure_partition(conn: &Connection, partition: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
            params![partition, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_response(
        tx: &Transaction<'_>,
        partition: &str,
        key: &RequestKey,
        response: &ResponseDescriptor,
    ) -> Result<(), StoreError> {
        let headers = encode_headers(&response.headers)?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO responses
                (partition, method, url, status, response_type, headers, body, sha256, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                partition,
                key.method(),
                key.url(),
                response.status.as_u16() as i64,
                response.response_type.as_str(),
                headers,
                response.body.as_ref(),
                sha256(&response.body),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResponseStore for SqliteResponseStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::ensure_partition(&conn, partition)
    }

    async fn put(
        &self,
        partition: &str,
        key: &RequestKey,
        response: &ResponseDescriptor,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::ensure_partition(&tx, partition)?;
        Self::insert_response(&tx, partition, key, response)?;
        tx.commit()?;

        debug!("Stored {} in {} ({} bytes)", key, partition, response.body.len());
        Ok(())
    }

    async fn put_all(
        &self,
        partition: &str,
        entries: &[(RequestKey, ResponseDescriptor)],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::ensure_partition(&tx, partition)?;
        for (key, response) in entries {
            Self::insert_response(&tx, partition, key, response)?;
        }
        tx.commit()?;

        debug!("Stored {} responses in {}", entries.len(), partition);
        Ok(())
    }

    async fn lookup(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<ResponseDescriptor>, StoreError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                r#"
                SELECT status, response_type, headers, body, sha256
                FROM responses
                WHERE partition = ?1 AND method = ?2 AND url = ?3
                "#,
                params![partition, key.method(), key.url()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, response_type, headers, body, digest)) = row else {
            return Ok(None);
        };

        let key_name = key.to_string();
        verify(&key_name, &body, &digest)?;

        let corrupt = |reason: String| StoreError::Corrupt {
            key: key_name.clone(),
            reason,
        };
        let status = u16::try_from(status)
            .ok()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .ok_or_else(|| corrupt(format!("invalid status {}", status)))?;
        let response_type = ResponseType::from_name(&response_type)
            .ok_or_else(|| corrupt(format!("unknown response type {}", response_type)))?;

        Ok(Some(ResponseDescriptor {
            status,
            headers: decode_headers(&key_name, &headers)?,
            body: body.into(),
            response_type,
        }))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT method, url FROM responses WHERE partition = ?1 ORDER BY method, url",
        )?;
        let keys = stmt
            .query_map(params![partition], |row| {
                Ok(RequestKey::from_parts(row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    async fn partitions(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;

        let removed = conn.execute("DELETE FROM partitions WHERE name = ?1", params![partition])?;
        debug!("Deleted partition {} (existed: {})", partition, removed > 0);
        Ok(removed > 0)
    }
}
