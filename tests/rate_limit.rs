use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

use dynarag::config::RateLimitConfig;
use dynarag::rate_limit::{InMemoryWindowStore, RateLimiter, WindowSnapshot, WindowStore};
use dynarag_core::error::{RagError, RagResult};

/// A store that is always unreachable.
struct DownStore;

#[async_trait]
impl WindowStore for DownStore {
    async fn admit(
        &self,
        _key: &str,
        _now_ms: i64,
        _window_ms: i64,
        _max_requests: u64,
    ) -> RagResult<WindowSnapshot> {
        Err(RagError::dependency("redis", "connection refused"))
    }
}

fn limiter(max_requests: u64, window_secs: u64) -> RateLimiter {
    RateLimiter::new(
        Arc::new(InMemoryWindowStore::new()),
        Duration::from_secs(window_secs),
        max_requests,
    )
}

#[tokio::test]
async fn test_window_admits_max_then_denies_then_recovers() {
    let limiter = limiter(100, 100);
    let t0 = 1_700_000_000_000i64;

    for i in 0..100 {
        let decision = limiter.allow_at("client", t0 + i * 10).await;
        assert!(decision.allowed, "request {} denied", i + 1);
        assert_eq!(decision.count, i as u64 + 1);
    }

    let denied = limiter.allow_at("client", t0 + 50_000).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(Duration::from_millis(50_000)));

    // Only the entry at t0 has expired; that alone frees a slot.
    let later = limiter.allow_at("client", t0 + 100_005).await;
    assert!(later.allowed);
    assert_eq!(later.count, 100);
    assert!(!limiter.allow_at("client", t0 + 100_006).await.allowed);
}

#[tokio::test]
async fn test_admits_exactly_when_oldest_expires() {
    let limiter = limiter(3, 10);
    assert!(limiter.allow_at("c", 1_000).await.allowed);
    assert!(limiter.allow_at("c", 2_000).await.allowed);
    assert!(limiter.allow_at("c", 3_000).await.allowed);
    for t in [4_000, 7_000, 10_999] {
        assert!(!limiter.allow_at("c", t).await.allowed, "admitted at {}", t);
    }
    assert!(limiter.allow_at("c", 11_000).await.allowed);
}

#[tokio::test]
async fn test_client_following_retry_hint_is_admitted() {
    let limiter = limiter(2, 10);
    let mut now = 0i64;
    assert!(limiter.allow_at("c", now).await.allowed);
    now += 4_000;
    assert!(limiter.allow_at("c", now).await.allowed);

    for _ in 0..5 {
        now += 2_000;
        let denied = limiter.allow_at("c", now).await;
        assert!(!denied.allowed);
        let wait = denied.retry_after.unwrap();
        assert!(wait > Duration::ZERO);

        now += wait.as_millis() as i64;
        let retried = limiter.allow_at("c", now).await;
        assert!(retried.allowed, "hint of {:?} did not lead to admission at {}", wait, now);
    }
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let limiter = limiter(2, 60);
    assert!(limiter.allow_at("a", 0).await.allowed);
    assert!(limiter.allow_at("a", 1).await.allowed);
    assert!(!limiter.allow_at("a", 2).await.allowed);
    assert!(limiter.allow_at("b", 3).await.allowed);
}

#[tokio::test]
async fn test_check_maps_denial_to_error() {
    let limiter = limiter(1, 60);
    limiter.check("c").await.unwrap();
    match limiter.check("c").await {
        Err(RagError::RateLimitExceeded { retry_after }) => {
            assert!(retry_after <= Duration::from_secs(60));
            assert!(retry_after > Duration::from_secs(50));
        }
        other => panic!("expected rate limit error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let limiter = RateLimiter::new(Arc::new(DownStore), Duration::from_secs(1), 1);
    for _ in 0..5 {
        let decision = limiter.allow("client").await;
        assert!(decision.allowed);
        assert_eq!(decision.retry_after, None);
    }
    limiter.check("client").await.unwrap();
}

#[tokio::test]
async fn test_unreachable_redis_fails_open() {
    // Nothing listens on port 1; the connection attempt fails.
    let config = RateLimitConfig {
        redis_url: Some("redis://127.0.0.1:1/".to_string()),
        max_requests: 1,
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::from_config(&config).unwrap();
    assert!(limiter.allow("client").await.allowed);
    assert!(limiter.allow("client").await.allowed);
}

#[tokio::test]
async fn test_silent_redis_fails_open_within_timeouts() {
    // Accepts connections and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = RateLimitConfig {
        redis_url: Some(format!("redis://{}/", addr)),
        max_requests: 1,
        connect_timeout_ms: 200,
        response_timeout_ms: 200,
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::from_config(&config).unwrap();

    for _ in 0..2 {
        let started = Instant::now();
        let decision = tokio::time::timeout(Duration::from_secs(5), limiter.allow("client"))
            .await
            .expect("allow() hung on a silent redis");
        assert!(decision.allowed);
        assert_eq!(decision.count, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_max() {
    let limiter = Arc::new(limiter(25, 60));
    let handles: Vec<_> = (0..100)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.allow_at("burst", 1_000).await.allowed })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 25);
}
