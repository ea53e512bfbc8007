use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time;

use crate::error::{Error, Result};
use crate::rate_limit_config::BucketConfig;
use crate::store::{AtomicCounterStore, CounterState};

/// Retries after the first failed attempt of a single command.
const MAX_RETRIES_PER_REQUEST: usize = 1;

/// Increment and expiry in one round trip.
///
/// KEYS[1] entry key; ARGV[1] window ms; ARGV[2] points; ARGV[3] block ms.
/// Returns `{consumed, pttl}`.
const CONSUME_SCRIPT: &str = r#"
local consumed = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    ttl = tonumber(ARGV[1])
    redis.call('PEXPIRE', KEYS[1], ttl)
end
local block = tonumber(ARGV[3])
if consumed == tonumber(ARGV[2]) + 1 and block > ttl then
    redis.call('PEXPIRE', KEYS[1], block)
    ttl = block
end
return {consumed, ttl}
"#;

#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(2_000),
            command_timeout: Duration::from_millis(500),
        }
    }
}

/// Redis-backed counter store.
///
/// The connection is established lazily and dropped on I/O failure so the
/// next command or health probe reconnects. Commands fail fast: no offline
/// queue and at most one retry.
pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    options: RedisOptions,
}

impl RedisStore {
    pub fn new(redis_url: &str, options: RedisOptions) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::Configuration(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            options,
        })
    }

    /// Open the connection eagerly and verify it with a PING.
    pub async fn connect(&self) -> Result<()> {
        self.ping().await
    }

    fn cached_connection(&self) -> Result<Option<MultiplexedConnection>> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire connection lock".into()))?;
        Ok(guard.clone())
    }

    fn store_connection(&self, conn: Option<MultiplexedConnection>) -> Result<()> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire connection lock".into()))?;
        *guard = conn;
        Ok(())
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.cached_connection()? {
            return Ok(conn);
        }

        let conn = time::timeout(
            self.options.connect_timeout,
            self.client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| {
            Error::StoreUnavailable(format!(
                "Connecting to Redis timed out after {:?}",
                self.options.connect_timeout
            ))
        })??;

        self.store_connection(Some(conn.clone()))?;
        tracing::debug!("Redis connection established");
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES_PER_REQUEST {
            if attempt > 0 {
                tracing::debug!(attempt, "Retrying Redis command");
            }

            let mut conn = match self.connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            match time::timeout(self.options.command_timeout, cmd.query_async::<_, T>(&mut conn)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                        self.store_connection(None)?;
                    }
                    last_error = Some(Error::Redis(e));
                }
                Err(_) => {
                    self.store_connection(None)?;
                    last_error = Some(Error::StoreUnavailable(format!(
                        "Redis command timed out after {:?}",
                        self.options.command_timeout
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::StoreUnavailable("No Redis connection available".into())))
    }
}

fn consume_command(key: &str, config: &BucketConfig) -> Cmd {
    let mut cmd = redis::cmd("EVAL");
    cmd.arg(CONSUME_SCRIPT)
        .arg(1)
        .arg(key)
        .arg(config.window_ms())
        .arg(config.points)
        .arg(config.block_ms());
    cmd
}

#[async_trait]
impl AtomicCounterStore for RedisStore {
    async fn consume(&self, key: &str, config: &BucketConfig) -> Result<CounterState> {
        let (consumed, ttl): (i64, i64) = self.query(&consume_command(key, config)).await?;

        Ok(CounterState {
            consumed: consumed.max(0) as u64,
            ms_before_next: ttl.max(0) as u64,
        })
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        let ttl_ms: i64 = self.query(&cmd).await?;

        // -2 missing key, -1 no expiry
        Ok((ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let deleted: i64 = self.query(&cmd).await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<()> {
        let pong: String = self.query(&redis::cmd("PING")).await?;
        if pong != "PONG" {
            return Err(Error::StoreUnavailable(format!("Unexpected PING reply: {}", pong)));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut conn) = self.cached_connection()? else {
            return Ok(());
        };
        self.store_connection(None)?;

        let quit = time::timeout(
            self.options.command_timeout,
            redis::cmd("QUIT").query_async::<_, String>(&mut conn),
        )
        .await;
        if let Ok(Err(e)) = quit {
            tracing::debug!(error = %e, "Redis QUIT failed, dropping connection");
        }
        tracing::info!("Redis connection closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        assert!(matches!(
            RedisStore::new("not a url", RedisOptions::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_consume_command_arguments() {
        let config = BucketConfig::auth();
        let packed = consume_command("auth:1.2.3.4", &config).get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        assert!(text.contains("EVAL"));
        assert!(text.contains("auth:1.2.3.4"));
        assert!(text.contains("900000"));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_fast() {
        let options = RedisOptions {
            connect_timeout: Duration::from_millis(200),
            command_timeout: Duration::from_millis(200),
        };
        // port 1 is reserved and closed on test hosts
        let store = RedisStore::new("redis://127.0.0.1:1", options).unwrap();
        let started = std::time::Instant::now();
        let result = store.consume("auth:k", &BucketConfig::auth()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_store_failure());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
