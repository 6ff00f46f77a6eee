use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    domain::{ChannelId, GroupId},
    ports::{GroupStore, LinkResult},
    Result,
};

/// SQLite-backed group membership.
///
/// `link`/`unlink` run inside a transaction and are additionally serialized
/// in-process so overlapping pair/unpair commands never interleave their
/// read-then-write steps.
pub struct SqliteGroupStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteGroupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }
}

async fn group_of(conn: &mut SqliteConnection, channel: ChannelId) -> Result<Option<GroupId>> {
    let row: Option<i64> =
        sqlx::query_scalar("SELECT group_id FROM channel_link WHERE channel_id = ?")
            .bind(channel.0)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(GroupId))
}

async fn member_count(conn: &mut SqliteConnection, group: GroupId) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channel_link WHERE group_id = ?")
        .bind(group.0)
        .fetch_one(conn)
        .await?;
    Ok(n)
}

async fn assign(conn: &mut SqliteConnection, channel: ChannelId, group: GroupId) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO channel_link (channel_id, group_id)
           VALUES (?, ?)
           ON CONFLICT(channel_id) DO UPDATE SET group_id = excluded.group_id"#,
    )
    .bind(channel.0)
    .bind(group.0)
    .execute(conn)
    .await?;
    Ok(())
}

async fn remove_group(conn: &mut SqliteConnection, group: GroupId) -> Result<bool> {
    let res = sqlx::query("DELETE FROM link_group WHERE group_id = ?")
        .bind(group.0)
        .execute(conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[async_trait]
impl GroupStore for SqliteGroupStore {
    async fn get_group(&self, channel: ChannelId) -> Result<Option<GroupId>> {
        let mut conn = self.pool.acquire().await?;
        group_of(&mut conn, channel).await
    }

    async fn link(&self, a: ChannelId, b: ChannelId) -> Result<LinkResult> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let ga = group_of(&mut tx, a).await?;
        let gb = group_of(&mut tx, b).await?;

        if let (Some(x), Some(y)) = (ga, gb) {
            if x == y {
                tx.rollback().await?;
                return Ok(LinkResult::AlreadyLinked(x));
            }
        }

        let target = match ga.into_iter().chain(gb).min() {
            Some(existing) => existing,
            None => {
                let res = sqlx::query("INSERT INTO link_group DEFAULT VALUES")
                    .execute(&mut *tx)
                    .await?;
                let created = GroupId(res.last_insert_rowid());
                debug!(group = %created, "created link group");
                created
            }
        };

        assign(&mut tx, a, target).await?;
        assign(&mut tx, b, target).await?;

        // A channel that moved may have left its former group empty.
        for former in [ga, gb].into_iter().flatten() {
            if former != target && member_count(&mut tx, former).await? == 0 {
                remove_group(&mut tx, former).await?;
                debug!(group = %former, "removed emptied link group");
            }
        }

        tx.commit().await?;
        info!(a = %a, b = %b, group = %target, "channels linked");
        Ok(LinkResult::Linked(target))
    }

    async fn unlink(&self, channel: ChannelId) -> Result<Option<GroupId>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let Some(group) = group_of(&mut tx, channel).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM channel_link WHERE channel_id = ?")
            .bind(channel.0)
            .execute(&mut *tx)
            .await?;

        // A lone survivor has nobody to relay to; cascade removes its row too.
        if member_count(&mut tx, group).await? < 2 {
            remove_group(&mut tx, group).await?;
            debug!(group = %group, "removed link group with fewer than two members");
        }

        tx.commit().await?;
        info!(channel = %channel, group = %group, "channel unlinked");
        Ok(Some(group))
    }

    async fn peers_of(&self, channel: ChannelId) -> Result<Vec<ChannelId>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            r#"SELECT channel_id
                 FROM channel_link
                WHERE group_id = (SELECT group_id FROM channel_link WHERE channel_id = ?)
                  AND channel_id != ?
                ORDER BY channel_id"#,
        )
        .bind(channel.0)
        .bind(channel.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ChannelId).collect())
    }

    async fn members(&self, group: GroupId) -> Result<Vec<ChannelId>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT channel_id FROM channel_link WHERE group_id = ? ORDER BY channel_id",
        )
        .bind(group.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ChannelId).collect())
    }

    async fn delete_group(&self, group: GroupId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        remove_group(&mut conn, group).await
    }
}
