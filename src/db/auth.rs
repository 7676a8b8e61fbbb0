use rusqlite::{params, OptionalExtension};

use super::{current_timestamp_millis, Database};
use crate::error::StorageResult;

/// 凭据持久化：单行表，id 固定为 1。刷新成功后整行覆盖，刷新失败时整行删除。
pub(crate) const AUTH_TABLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS auth_tokens (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at_millis INTEGER,
    scope TEXT,
    token_type TEXT,
    updated_at_millis INTEGER NOT NULL
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_millis: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub updated_at_millis: i64,
}

impl Database {
    pub fn upsert_auth_record(&self, record: &AuthTokenRecord) -> StorageResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO auth_tokens (
                    id,
                    access_token,
                    refresh_token,
                    expires_at_millis,
                    scope,
                    token_type,
                    updated_at_millis
                )
                VALUES (1, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at_millis = excluded.expires_at_millis,
                    scope = excluded.scope,
                    token_type = excluded.token_type,
                    updated_at_millis = excluded.updated_at_millis",
                params![
                    record.access_token,
                    record.refresh_token,
                    record.expires_at_millis,
                    record.scope,
                    record.token_type,
                    current_timestamp_millis(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn load_auth_record(&self) -> StorageResult<Option<AuthTokenRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT
                        access_token,
                        refresh_token,
                        expires_at_millis,
                        scope,
                        token_type,
                        updated_at_millis
                    FROM auth_tokens
                    WHERE id = 1",
                    [],
                    |row| {
                        Ok(AuthTokenRecord {
                            access_token: row.get(0)?,
                            refresh_token: row.get(1)?,
                            expires_at_millis: row.get(2)?,
                            scope: row.get(3)?,
                            token_type: row.get(4)?,
                            updated_at_millis: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
    }

    pub fn clear_auth_record(&self) -> StorageResult<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM auth_tokens WHERE id = 1", [])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str) -> AuthTokenRecord {
        AuthTokenRecord {
            access_token: token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at_millis: Some(1_700_000_000_000),
            scope: Some("photos.readwrite offline_access".to_string()),
            token_type: Some("Bearer".to_string()),
            updated_at_millis: 0,
        }
    }

    #[test]
    fn auth_record_upsert_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::at(dir.path().join("nested").join("test.db"));
        assert_eq!(db.load_auth_record().unwrap(), None);

        db.upsert_auth_record(&record("access-1")).unwrap();
        db.upsert_auth_record(&record("access-2")).unwrap();
        let loaded = db.load_auth_record().unwrap().unwrap();
        assert_eq!(loaded.access_token, "access-2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
        assert!(loaded.updated_at_millis > 0);

        db.clear_auth_record().unwrap();
        assert_eq!(db.load_auth_record().unwrap(), None);
    }
}
