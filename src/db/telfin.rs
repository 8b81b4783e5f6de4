use chrono::{DateTime, Utc};

use crate::db::models::{TelfinCall, TelfinConnection, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

const CONNECTION_COLUMNS: &str = r#"id, organization_id, auth_mode, client_id, client_secret,
    telfin_client_id, login, password, is_active, last_sync_at, created_at"#;
const TELFIN_CALL_COLUMNS: &str = r#"id, organization_id, call_uuid, direction, from_number,
    to_number, started_at, duration_seconds, record_uuid, result, raw, synced_at"#;

impl Storage {
    /// Upsert by unique organization_id. `last_sync_at` survives re-saves.
    pub async fn save_telfin_connection(
        &self,
        conn: &TelfinConnection,
    ) -> Result<TelfinConnection, CallControlError> {
        sqlx::query(
            r#"INSERT INTO telfin_connections (
                id, organization_id, auth_mode, client_id, client_secret, telfin_client_id,
                login, password, is_active, last_sync_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                auth_mode = excluded.auth_mode,
                client_id = excluded.client_id,
                client_secret = COALESCE(excluded.client_secret, telfin_connections.client_secret),
                telfin_client_id = excluded.telfin_client_id,
                login = excluded.login,
                password = COALESCE(excluded.password, telfin_connections.password),
                is_active = excluded.is_active"#,
        )
        .bind(&conn.id)
        .bind(&conn.organization_id)
        .bind(conn.auth_mode)
        .bind(&conn.client_id)
        .bind(&conn.client_secret)
        .bind(&conn.telfin_client_id)
        .bind(&conn.login)
        .bind(&conn.password)
        .bind(conn.is_active)
        .bind(conn.last_sync_at.map(ts))
        .bind(ts(conn.created_at))
        .execute(self.pool())
        .await?;

        self.get_telfin_connection(&conn.organization_id)
            .await?
            .ok_or(CallControlError::NotFound("telfin connection"))
    }

    pub async fn get_telfin_connection(
        &self,
        organization_id: &str,
    ) -> Result<Option<TelfinConnection>, CallControlError> {
        let conn = sqlx::query_as::<_, TelfinConnection>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM telfin_connections WHERE organization_id = ?"
        ))
        .bind(organization_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(conn)
    }

    pub async fn set_telfin_client_id(
        &self,
        organization_id: &str,
        telfin_client_id: &str,
    ) -> Result<(), CallControlError> {
        sqlx::query("UPDATE telfin_connections SET telfin_client_id = ? WHERE organization_id = ?")
            .bind(telfin_client_id)
            .bind(organization_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn touch_telfin_sync(
        &self,
        organization_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CallControlError> {
        sqlx::query("UPDATE telfin_connections SET last_sync_at = ? WHERE organization_id = ?")
            .bind(ts(at))
            .bind(organization_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Batch upsert by (organization_id, call_uuid) in a single transaction. Returns the number of rows written.
    pub async fn upsert_telfin_calls(&self, calls: &[TelfinCall]) -> Result<u64, CallControlError> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0;
        for call in calls {
            let res = sqlx::query(&format!(
                r#"INSERT INTO telfin_calls ({TELFIN_CALL_COLUMNS})
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(organization_id, call_uuid) DO UPDATE SET
                       direction = excluded.direction,
                       from_number = excluded.from_number,
                       to_number = excluded.to_number,
                       started_at = excluded.started_at,
                       duration_seconds = excluded.duration_seconds,
                       record_uuid = excluded.record_uuid,
                       result = excluded.result,
                       raw = excluded.raw,
                       synced_at = excluded.synced_at"#
            ))
            .bind(&call.id)
            .bind(&call.organization_id)
            .bind(&call.call_uuid)
            .bind(&call.direction)
            .bind(&call.from_number)
            .bind(&call.to_number)
            .bind(&call.started_at)
            .bind(call.duration_seconds)
            .bind(&call.record_uuid)
            .bind(&call.result)
            .bind(&call.raw)
            .bind(ts(call.synced_at))
            .execute(&mut *tx)
            .await?;
            written += res.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    pub async fn list_telfin_calls(
        &self,
        organization_id: &str,
        limit: i64,
    ) -> Result<Vec<TelfinCall>, CallControlError> {
        let calls = sqlx::query_as::<_, TelfinCall>(&format!(
            "SELECT {TELFIN_CALL_COLUMNS} FROM telfin_calls WHERE organization_id = ? \
             ORDER BY started_at DESC LIMIT ?"
        ))
        .bind(organization_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(calls)
    }
}
