use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    domain::{ChannelId, Endpoint},
    ports::EndpointStore,
    Result,
};

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct EndpointRow {
    channel_id: i64,
    url: String,
}

impl From<EndpointRow> for Endpoint {
    fn from(r: EndpointRow) -> Self {
        Self {
            channel_id: ChannelId(r.channel_id),
            url: r.url,
        }
    }
}

/// SQLite-backed endpoint records.
pub struct SqliteEndpointStore {
    pool: SqlitePool,
}

impl SqliteEndpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EndpointStore for SqliteEndpointStore {
    async fn get(&self, channel: ChannelId) -> Result<Option<Endpoint>> {
        let row = sqlx::query_as::<_, EndpointRow>(
            "SELECT channel_id, url FROM endpoint WHERE channel_id = ?",
        )
        .bind(channel.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert(&self, endpoint: &Endpoint) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"INSERT INTO endpoint (channel_id, url, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(channel_id) DO UPDATE SET
                 url = excluded.url,
                 updated_at = excluded.updated_at"#,
        )
        .bind(endpoint.channel_id.0)
        .bind(&endpoint.url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, channel: ChannelId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM endpoint WHERE channel_id = ?")
            .bind(channel.0)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
