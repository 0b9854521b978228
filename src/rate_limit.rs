//! Sliding-window admission control.
//!
//! Each client key owns a time-ordered log of admitted request timestamps
//! in a [`WindowStore`]. On every request the limiter, as one unit against
//! the store:
//!
//! 1. evicts timestamps at or before `now - window`,
//! 2. counts what remains,
//! 3. records `now` and refreshes the key's expiry if the count is below
//!    `max_requests`.
//!
//! Denied requests are not recorded, so once the oldest admitted entry
//! leaves the window the next request is admitted. The `retry_after` hint
//! on a denial points exactly at that moment.
//!
//! If the store cannot be reached, or does not answer within its timeouts,
//! the limiter fails open: the request is admitted and the failure is
//! logged at `warn`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use dynarag_core::error::{RagError, RagResult, ResultExt};

use crate::config::RateLimitConfig;

/// State of one client's window after an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub admitted: bool,
    /// Admitted entries in the window, including this request if admitted.
    pub count: u64,
    /// When denied: timestamp (ms) of the entry whose expiry frees a slot.
    pub blocking_ms: Option<i64>,
}

/// Backing store for request logs.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Evict entries `<= now_ms - window_ms`; if fewer than `max_requests`
    /// remain, record `now_ms` and refresh the key's expiry. Must behave as
    /// one atomic unit per key.
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u64,
    ) -> RagResult<WindowSnapshot>;
}

// ============ Redis ============

// KEYS[1] = window key
// ARGV = cutoff, now, window_ms, max_requests, member
// Returns {admitted, count, blocking score or -1}.
const ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
local max = tonumber(ARGV[4])
if count < max then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[5])
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
  return {1, count + 1, -1}
end
local blocking = redis.call('ZRANGE', KEYS[1], count - max, count - max, 'WITHSCORES')
return {0, count, tonumber(blocking[2])}
"#;

/// Window store shared across processes through Redis sorted sets.
///
/// Keys are `ratelimit:<client>`; members are unique per request so that
/// requests within the same millisecond are all counted. The connection is
/// established on first use and shared (multiplexed) afterwards; a failed
/// connect is retried on the next request. Every call is bounded by the
/// connect and response timeouts.
pub struct RedisWindowStore {
    client: redis::Client,
    connection: OnceCell<redis::aio::MultiplexedConnection>,
    script: redis::Script,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisWindowStore {
    pub fn new(url: &str, connect_timeout: Duration, response_timeout: Duration) -> RagResult<Self> {
        let client = redis::Client::open(url).dependency("redis")?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            script: redis::Script::new(ADMIT_SCRIPT),
            connect_timeout,
            response_timeout,
        })
    }

    async fn connection(&self) -> RagResult<redis::aio::MultiplexedConnection> {
        self.connection
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection_with_timeouts(
                        self.response_timeout,
                        self.connect_timeout,
                    )
                    .await
                    .dependency("redis")
            })
            .await
            .cloned()
    }

    async fn run_script(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u64,
    ) -> RagResult<WindowSnapshot> {
        let mut conn = self.connection().await?;
        let key = format!("ratelimit:{}", key);
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

        let (admitted, count, blocking): (i64, u64, i64) = self
            .script
            .key(&key)
            .arg(now_ms.saturating_sub(window_ms))
            .arg(now_ms)
            .arg(window_ms)
            .arg(max_requests)
            .arg(&member)
            .invoke_async(&mut conn)
            .await
            .dependency("redis")?;

        Ok(WindowSnapshot {
            admitted: admitted == 1,
            count,
            blocking_ms: (admitted != 1 && blocking >= 0).then_some(blocking),
        })
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u64,
    ) -> RagResult<WindowSnapshot> {
        let budget = self.connect_timeout + self.response_timeout;
        tokio::time::timeout(budget, self.run_script(key, now_ms, window_ms, max_requests))
            .await
            .map_err(|_| RagError::dependency("redis", format!("no reply within {:?}", budget)))?
    }
}

// ============ In-process ============

/// Window store local to this process.
///
/// Used when no Redis URL is configured, and in tests.
#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u64,
    ) -> RagResult<WindowSnapshot> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = now_ms.saturating_sub(window_ms);
        // Expired keys are dropped lazily, standing in for a TTL.
        windows.retain(|_, log| log.back().map_or(false, |last| *last > cutoff));

        let log = windows.entry(key.to_string()).or_default();
        while log.front().map_or(false, |ts| *ts <= cutoff) {
            log.pop_front();
        }

        let count = log.len() as u64;
        if count >= max_requests {
            let blocking = usize::try_from(count - max_requests)
                .ok()
                .and_then(|i| log.get(i))
                .copied();
            return Ok(WindowSnapshot {
                admitted: false,
                count,
                blocking_ms: blocking,
            });
        }

        // Keep the log sorted even if the clock goes backwards.
        let pos = log.partition_point(|ts| *ts <= now_ms);
        log.insert(pos, now_ms);

        Ok(WindowSnapshot {
            admitted: true,
            count: count + 1,
            blocking_ms: None,
        })
    }
}

// ============ Limiter ============

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Admitted requests in the window (0 when the store failed).
    pub count: u64,
    /// When denied: time until the window admits another request.
    pub retry_after: Option<Duration>,
}

/// Per-client sliding-window rate limiter.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    window: Duration,
    max_requests: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, window: Duration, max_requests: u64) -> Self {
        Self {
            store,
            window,
            max_requests: max_requests.max(1),
        }
    }

    /// Build from `[rate_limit]`, using Redis when `redis_url` is set.
    pub fn from_config(config: &RateLimitConfig) -> RagResult<Self> {
        let store: Arc<dyn WindowStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisWindowStore::new(
                url,
                Duration::from_millis(config.connect_timeout_ms),
                Duration::from_millis(config.response_timeout_ms),
            )?),
            None => Arc::new(InMemoryWindowStore::new()),
        };
        Ok(Self::new(
            store,
            Duration::from_secs(config.window_secs),
            config.max_requests,
        ))
    }

    /// Decide whether `client_key` may make a request now.
    pub async fn allow(&self, client_key: &str) -> RateLimitDecision {
        self.allow_at(client_key, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// [`allow`](Self::allow) with an explicit clock, in epoch milliseconds.
    pub async fn allow_at(&self, client_key: &str, now_ms: i64) -> RateLimitDecision {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        match self
            .store
            .admit(client_key, now_ms, window_ms, self.max_requests)
            .await
        {
            Ok(snapshot) => {
                let retry_after = if snapshot.admitted {
                    None
                } else {
                    debug!(client_key, count = snapshot.count, "rate limit exceeded");
                    let free_at = snapshot
                        .blocking_ms
                        .unwrap_or(now_ms)
                        .saturating_add(window_ms);
                    let wait_ms = free_at.saturating_sub(now_ms).max(0) as u64;
                    Some(Duration::from_millis(wait_ms))
                };
                RateLimitDecision {
                    allowed: snapshot.admitted,
                    count: snapshot.count,
                    retry_after,
                }
            }
            Err(e) => {
                warn!(client_key, error = %e, "rate limit store unavailable, allowing request");
                RateLimitDecision {
                    allowed: true,
                    count: 0,
                    retry_after: None,
                }
            }
        }
    }

    /// Like [`allow`](Self::allow), mapping a denial to
    /// [`RagError::RateLimitExceeded`].
    pub async fn check(&self, client_key: &str) -> RagResult<()> {
        let decision = self.allow(client_key).await;
        if decision.allowed {
            Ok(())
        } else {
            Err(RagError::RateLimitExceeded {
                retry_after: decision.retry_after.unwrap_or(self.window),
            })
        }
    }
}

/// Derive a client identity from an `X-Forwarded-For` header value (first
/// hop) or, failing that, the peer address without its port.
///
/// ```rust
/// use dynarag::rate_limit::client_key_from_forwarded;
///
/// assert_eq!(client_key_from_forwarded(Some("203.0.113.7, 10.0.0.1"), "10.0.0.2:443"), "203.0.113.7");
/// assert_eq!(client_key_from_forwarded(None, "10.0.0.2:443"), "10.0.0.2");
/// ```
pub fn client_key_from_forwarded(forwarded_for: Option<&str>, remote_addr: &str) -> String {
    if let Some(first) = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return first.to_string();
    }
    match remote_addr.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => remote_addr.to_string(),
    }
}
