use crate::config::DedupConfig;
use crate::dedup::DedupCache;
use crate::DedupError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

/// Dedup cache backed by Redis `SETEX` / `EXISTS`
#[derive(Clone)]
pub struct RedisDedupCache {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisDedupCache {
    /// Opens a multiplexed connection and pings the server
    ///
    /// # Returns
    ///
    /// * `Ok(RedisDedupCache)` - Connected cache
    /// * `Err(DedupError)` - Bad URL, unreachable server, or failed ping
    pub async fn connect(config: &DedupConfig) -> Result<Self, DedupError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, url: &str) -> String {
        dedup_key(&self.key_prefix, url)
    }
}

/// Builds the dedup key for a URL
pub fn dedup_key(prefix: &str, url: &str) -> String {
    format!("{}{}", prefix, url)
}

#[async_trait]
impl DedupCache for RedisDedupCache {
    async fn exists(&self, url: &str) -> Result<bool, DedupError> {
        let mut conn = self.conn.clone();
        let present: bool = conn.exists(self.key(url)).await?;
        Ok(present)
    }

    async fn mark_processed(&self, url: &str, ttl_seconds: u64) -> Result<(), DedupError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(url), "1", ttl_seconds)
            .await?;
        Ok(())
    }
}
