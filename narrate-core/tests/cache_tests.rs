use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use narrate_core::cache::DEFAULT_TTL;
use narrate_core::{FetchCache, FetchError, ManualClock};
use tokio::sync::Notify;

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn concurrent_reads_share_one_fetch() {
    let cache = FetchCache::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());

    let mut readers = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let calls = calls.clone();
        let release = release.clone();
        readers.push(tokio::spawn(async move {
            // zero ttl: only coalescing can prevent a second fetch
            cache
                .read(
                    "summaries",
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            release.notified().await;
                            Ok(7)
                        }
                    },
                    Duration::ZERO,
                )
                .await
        }));
    }

    settle().await;
    assert!(cache.is_in_flight("summaries").await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    release.notify_one();
    for reader in readers {
        assert_eq!(reader.await.unwrap(), Ok(7));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.is_in_flight("summaries").await);
}

#[tokio::test]
async fn fresh_value_is_served_until_ttl_elapses() {
    let clock = Arc::new(ManualClock::new());
    let cache = FetchCache::<String>::with_clock(clock.clone(), 8);
    let calls = Arc::new(AtomicUsize::new(0));

    let read = |cache: FetchCache<String>, calls: Arc<AtomicUsize>| async move {
        cache
            .read(
                "summaries",
                move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Ok(format!("v{n}")) }
                },
                DEFAULT_TTL,
            )
            .await
    };

    assert_eq!(read(cache.clone(), calls.clone()).await.unwrap(), "v1");
    assert_eq!(read(cache.clone(), calls.clone()).await.unwrap(), "v1");

    clock.advance(Duration::from_millis(59_999));
    assert_eq!(read(cache.clone(), calls.clone()).await.unwrap(), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_millis(1));
    assert_eq!(read(cache.clone(), calls.clone()).await.unwrap(), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failures_reach_every_waiter_and_are_not_cached() {
    let cache = FetchCache::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());

    let failing = {
        let calls = calls.clone();
        let release = release.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                release.notified().await;
                Err(FetchError::Status {
                    status: 500,
                    detail: "boom".into(),
                })
            }
        }
    };

    let first = {
        let cache = cache.clone();
        let failing = failing.clone();
        tokio::spawn(async move { cache.get("k", failing).await })
    };
    let second = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get("k", failing).await })
    };
    settle().await;
    release.notify_one();

    let expected = Err(FetchError::Status {
        status: 500,
        detail: "boom".into(),
    });
    assert_eq!(first.await.unwrap(), expected);
    assert_eq!(second.await.unwrap(), expected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty().await);

    let retried = cache.get("k", || async { Ok(3) }).await;
    assert_eq!(retried, Ok(3));
}

#[tokio::test]
async fn fetch_fills_cache_even_if_caller_goes_away() {
    let cache = FetchCache::<u32>::new();
    let release = Arc::new(Notify::new());

    let reader = {
        let cache = cache.clone();
        let release = release.clone();
        tokio::spawn(async move {
            cache
                .get("k", move || async move {
                    release.notified().await;
                    Ok(11)
                })
                .await
        })
    };
    settle().await;
    reader.abort();
    release.notify_one();
    settle().await;

    assert!(cache.contains("k").await);
    let value = cache
        .get("k", || async { Err(FetchError::Transport("unused".into())) })
        .await;
    assert_eq!(value, Ok(11));
}

#[tokio::test]
async fn least_recently_read_entry_is_evicted() {
    let cache = FetchCache::<u32>::with_clock(Arc::new(ManualClock::new()), 2);

    cache.get("voices/neets", || async { Ok(1) }).await.unwrap();
    cache.get("voices/elevenlabs", || async { Ok(2) }).await.unwrap();
    // touch the first one so the second becomes the oldest
    cache.get("voices/neets", || async { Ok(0) }).await.unwrap();
    cache.get("voices/openai", || async { Ok(3) }).await.unwrap();

    assert_eq!(cache.len().await, 2);
    assert!(cache.contains("voices/neets").await);
    assert!(cache.contains("voices/openai").await);
    assert!(!cache.contains("voices/elevenlabs").await);
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    let cache = FetchCache::<u32>::new();
    cache.get("k", || async { Ok(1) }).await.unwrap();
    assert!(cache.invalidate("k").await);
    assert_eq!(cache.get("k", || async { Ok(2) }).await, Ok(2));
}

#[tokio::test]
async fn clear_drops_every_stored_value() {
    let cache = FetchCache::<u32>::new();
    cache.get("a", || async { Ok(1) }).await.unwrap();
    cache.get("b", || async { Ok(2) }).await.unwrap();
    assert_eq!(cache.len().await, 2);

    cache.clear().await;
    assert!(cache.is_empty().await);
    assert_eq!(cache.get("a", || async { Ok(10) }).await, Ok(10));
}
