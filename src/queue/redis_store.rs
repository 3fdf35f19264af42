//! Redis-backed job store
//!
//! Layout:
//! - `harvest:job:<id>` hash holding the job fields
//! - `harvest:queue:<name>` list of ready ids (RPUSH / LPOP)
//! - `harvest:queue:<name>:scheduled` sorted set of ids keyed by due time

use crate::queue::job::JobRecord;
use crate::queue::store::JobStore;
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;

const KEY_PREFIX: &str = "harvest";

pub struct RedisJobStore {
    conn: MultiplexedConnection,
    queue_name: String,
}

impl RedisJobStore {
    /// Connects and pings the store
    ///
    /// Any failure here is reported as [`QueueError::Unavailable`].
    pub async fn connect(redis_url: &str, queue_name: &str) -> QueueResult<Self> {
        let unavailable = |e: redis::RedisError| QueueError::Unavailable(e.to_string());

        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(unavailable)?;

        tracing::debug!(queue = %queue_name, "Connected to job store");

        Ok(Self {
            conn,
            queue_name: queue_name.to_string(),
        })
    }

    fn job_key(id: &str) -> String {
        format!("{}:job:{}", KEY_PREFIX, id)
    }

    fn queue_key(&self) -> String {
        format!("{}:queue:{}", KEY_PREFIX, self.queue_name)
    }

    fn scheduled_key(&self) -> String {
        format!("{}:queue:{}:scheduled", KEY_PREFIX, self.queue_name)
    }

    async fn write_fields(&self, record: &JobRecord) -> QueueResult<()> {
        let fields = record.to_fields()?;
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(Self::job_key(&record.id), &fields)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn enqueue(&self, record: &JobRecord) -> QueueResult<()> {
        let fields = record.to_fields()?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(Self::job_key(&record.id), &fields)
            .ignore()
            .rpush(self.queue_key(), &record.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_job_id(&self, now: DateTime<Utc>) -> QueueResult<Option<String>> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.scheduled_key())
            .arg("-inf")
            .arg(now.timestamp())
            .query_async(&mut conn)
            .await?;

        for id in due {
            // ZREM decides which worker promotes a contended id
            let removed: i64 = conn.zrem(self.scheduled_key(), &id).await?;
            if removed == 1 {
                conn.rpush::<_, _, ()>(self.queue_key(), &id).await?;
            }
        }

        let id: Option<String> = redis::cmd("LPOP")
            .arg(self.queue_key())
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> QueueResult<JobRecord> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, Vec<u8>> = conn.hgetall(Self::job_key(id)).await?;
        JobRecord::from_fields(id, &fields)
    }

    async fn raw_field(&self, id: &str, field: &str) -> QueueResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.hget(Self::job_key(id), field).await?;
        Ok(value)
    }

    async fn update(&self, record: &JobRecord) -> QueueResult<()> {
        self.write_fields(record).await
    }

    async fn write_raw_fields(
        &self,
        id: &str,
        fields: &[(&'static str, String)],
    ) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::job_key(id)).await?;
        if !exists {
            return Err(QueueError::JobNotFound(id.to_string()));
        }
        conn.hset_multiple::<_, _, _, ()>(Self::job_key(id), fields)
            .await?;
        Ok(())
    }

    async fn schedule_retry(&self, id: &str, due: DateTime<Utc>) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(self.scheduled_key(), id, due.timestamp())
            .await?;
        Ok(())
    }
}
