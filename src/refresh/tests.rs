use super::*;
use crate::store::{FieldStore, MemoryStore, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Page(u32),
    One(String),
}

/// Serves canned pages and coins, recording every request.
#[derive(Default)]
struct ScriptedSource {
    pages: HashMap<u32, Vec<AssetSnapshot>>,
    coins: HashMap<String, AssetSnapshot>,
    /// Pages that answer 429 on their first request only.
    throttled_once: Mutex<HashSet<u32>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedSource {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketSource for ScriptedSource {
    async fn fetch_page(&self, page: u32) -> Result<Vec<AssetSnapshot>, FetchError> {
        self.calls.lock().unwrap().push(Call::Page(page));
        if self.throttled_once.lock().unwrap().remove(&page) {
            return Err(FetchError::RateLimited);
        }
        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }

    async fn fetch_one(&self, id: &str) -> Result<AssetSnapshot, FetchError> {
        self.calls.lock().unwrap().push(Call::One(id.to_string()));
        match self.coins.get(id) {
            Some(s) => Ok(s.clone()),
            None => Err(FetchError::Status(reqwest::StatusCode::NOT_FOUND)),
        }
    }
}

/// Slow store that remembers the highest number of concurrent writes.
#[derive(Default)]
struct GaugedStore {
    inner: MemoryStore,
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl FieldStore for GaugedStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }
}

/// Store that is never reachable.
struct DownStore {
    attempts: AtomicUsize,
}

#[async_trait]
impl FieldStore for DownStore {
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("not connected to 127.0.0.1:6379".into()))
    }
}

fn snapshot(id: &str, symbol: &str, price: f64) -> AssetSnapshot {
    AssetSnapshot {
        id: id.into(),
        symbol: symbol.into(),
        current_price: price,
        ..Default::default()
    }
}

fn coordinator(
    config: RefreshConfig,
    source: Arc<ScriptedSource>,
    store: Arc<dyn FieldStore>,
) -> (Coordinator, Arc<FetchCounters>) {
    let counters = Arc::new(FetchCounters::default());
    let coord = Coordinator::new(config, source, CacheWriter::new(store), counters.clone());
    (coord, counters)
}

/// Step until `done` holds for the phase about to run.
async fn step_until(
    coord: &mut Coordinator,
    mut phase: Phase,
    done: impl Fn(&Phase) -> bool,
) -> Phase {
    let cancel = CancellationToken::new();
    for _ in 0..1000 {
        if done(&phase) {
            return phase;
        }
        phase = coord.step(phase, &cancel).await.expect("not cancelled");
    }
    panic!("condition never reached, stuck in {phase:?}");
}

#[tokio::test(start_paused = true)]
async fn test_one_cycle_stores_page_with_ttl() {
    let source = Arc::new(ScriptedSource {
        pages: [(
            1,
            vec![
                snapshot("bitcoin", "btc", 50000.0),
                snapshot("ethereum", "eth", 3000.0),
            ],
        )]
        .into(),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_secs(60);
    let config = RefreshConfig::builder().ttl(ttl).build().unwrap();
    let (mut coord, counters) = coordinator(config, source.clone(), store.clone());

    let phase = step_until(&mut coord, Phase::FetchingPage, |p| {
        matches!(p, Phase::Sleeping)
    })
    .await;
    assert!(matches!(phase, Phase::Sleeping));

    assert_eq!(store.get("bitcoin#CurrentPrice").as_deref(), Some("50000"));
    assert_eq!(store.get("ethereum#CurrentPrice").as_deref(), Some("3000"));
    assert_eq!(store.get("bitcoin#Symbol").as_deref(), Some("btc"));
    assert_eq!(store.ttl("bitcoin#CurrentPrice"), Some(ttl));
    assert_eq!(counters.hits(), 1);
    assert_eq!(counters.misses(), 0);
    assert_eq!(source.calls(), vec![Call::Page(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_page_is_retried_in_place() {
    let source = Arc::new(ScriptedSource {
        throttled_once: Mutex::new([3].into()),
        ..Default::default()
    });
    let config = RefreshConfig::builder().max_pages(4).build().unwrap();
    let (mut coord, counters) =
        coordinator(config, source.clone(), Arc::new(MemoryStore::new()));

    let s = source.clone();
    step_until(&mut coord, Phase::FetchingPage, move |_| s.calls().len() >= 5).await;

    assert_eq!(
        source.calls(),
        vec![
            Call::Page(1),
            Call::Page(2),
            Call::Page(3),
            Call::Page(3),
            Call::Page(4)
        ]
    );
    assert_eq!(counters.misses(), 1);
    assert_eq!(counters.hits(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_pinned_assets_follow_the_last_page_once_per_round() {
    let source = Arc::new(ScriptedSource {
        pages: [(1, vec![snapshot("bitcoin", "btc", 50000.0)])].into(),
        coins: [("litecoin".to_string(), snapshot("litecoin", "ltc", 70.0))].into(),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let config = RefreshConfig::builder()
        .max_pages(2)
        .tail(vec!["litecoin".into()])
        .build()
        .unwrap();
    let (mut coord, _) = coordinator(config, source.clone(), store.clone());

    let s = source.clone();
    step_until(&mut coord, Phase::FetchingPage, move |_| s.calls().len() >= 7).await;

    let one = || Call::One("litecoin".into());
    assert_eq!(
        source.calls(),
        vec![
            Call::Page(1),
            Call::Page(2),
            one(),
            Call::Page(1),
            Call::Page(2),
            one(),
            Call::Page(1),
        ]
    );
    assert_eq!(store.get("litecoin#CurrentPrice").as_deref(), Some("70"));
    assert_eq!(coord.state().page_cursor(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pinned_asset_does_not_block_the_rest() {
    let source = Arc::new(ScriptedSource {
        coins: [("litecoin".to_string(), snapshot("litecoin", "ltc", 70.0))].into(),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let config = RefreshConfig::builder()
        .tail(vec!["ghost".into(), "litecoin".into()])
        .build()
        .unwrap();
    let (mut coord, counters) = coordinator(config, source.clone(), store.clone());

    step_until(&mut coord, Phase::FetchingPage, |p| {
        matches!(p, Phase::Sleeping)
    })
    .await;

    assert_eq!(
        source.calls(),
        vec![
            Call::Page(1),
            Call::One("ghost".into()),
            Call::One("litecoin".into())
        ]
    );
    assert_eq!(store.get("litecoin#Symbol").as_deref(), Some("ltc"));
    assert_eq!(store.get("ghost#Symbol"), None);
    assert_eq!(counters.hits(), 2);
    assert_eq!(counters.misses(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_respects_inflight_cap() {
    let snapshots = (0..10)
        .map(|i| snapshot(&format!("coin-{i}"), "c", i as f64))
        .collect();
    let source = Arc::new(ScriptedSource {
        pages: [(1, snapshots)].into(),
        ..Default::default()
    });
    let store = Arc::new(GaugedStore::default());
    let config = RefreshConfig::builder()
        .max_inflight_writes(2)
        .build()
        .unwrap();
    let (mut coord, _) = coordinator(config, source, store.clone());

    step_until(&mut coord, Phase::FetchingPage, |p| {
        matches!(p, Phase::Sleeping)
    })
    .await;

    assert!(store.peak.load(Ordering::SeqCst) <= 2);
    let per_asset = crate::flatten::flatten(&AssetSnapshot::default()).len();
    assert_eq!(store.inner.len(), 10 * per_asset);
}

#[tokio::test(start_paused = true)]
async fn test_barrier_joins_every_writer_before_advancing() {
    let snapshots = (0..5)
        .map(|i| snapshot(&format!("coin-{i}"), "c", 1.0))
        .collect();
    let source = Arc::new(ScriptedSource {
        pages: [(1, snapshots)].into(),
        ..Default::default()
    });
    let store = Arc::new(GaugedStore::default());
    let config = RefreshConfig::builder().max_pages(2).build().unwrap();
    let (mut coord, _) = coordinator(config, source, store.clone());

    let phase = step_until(&mut coord, Phase::FetchingPage, |p| {
        matches!(p, Phase::AwaitingBarrier { .. })
    })
    .await;
    assert_eq!(coord.state().page_cursor(), 1);

    // cancelling does not skip the join
    let cancel = CancellationToken::new();
    cancel.cancel();
    let next = coord.step(phase, &cancel).await.unwrap();

    assert!(matches!(next, Phase::FetchingPage));
    assert_eq!(coord.state().page_cursor(), 2);
    assert_eq!(store.current.load(Ordering::SeqCst), 0);
    assert_eq!(store.inner.get("coin-4#CurrentPrice").as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_cached_fields_expire_without_refresh() {
    let source = Arc::new(ScriptedSource {
        pages: [(1, vec![snapshot("bitcoin", "btc", 50000.0)])].into(),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let config = RefreshConfig::builder()
        .ttl(Duration::from_secs(2))
        .build()
        .unwrap();
    let (mut coord, _) = coordinator(config, source, store.clone());

    step_until(&mut coord, Phase::FetchingPage, |p| {
        matches!(p, Phase::Sleeping)
    })
    .await;
    assert!(store.get("bitcoin#CurrentPrice").is_some());

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(store.get("bitcoin#CurrentPrice"), None);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_when_cancelled() {
    let source = Arc::new(ScriptedSource {
        pages: [(1, vec![snapshot("bitcoin", "btc", 50000.0)])].into(),
        ..Default::default()
    });
    let config = RefreshConfig::builder()
        .interval(Duration::from_secs(30))
        .build()
        .unwrap();
    let (coord, counters) = coordinator(config, source, Arc::new(MemoryStore::new()));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(coord.run(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(45)).await;
    cancel.cancel();
    handle.await.unwrap();

    // one fetch at t=0, one after the first 30s pause
    assert_eq!(counters.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_keeps_cycling_while_store_is_unavailable() {
    let source = Arc::new(ScriptedSource {
        pages: [(
            1,
            vec![
                snapshot("bitcoin", "btc", 50000.0),
                snapshot("ethereum", "eth", 3000.0),
            ],
        )]
        .into(),
        ..Default::default()
    });
    let store = Arc::new(DownStore {
        attempts: AtomicUsize::new(0),
    });
    let config = RefreshConfig::builder().max_pages(2).build().unwrap();
    let (mut coord, counters) = coordinator(config, source.clone(), store.clone());

    // two full rounds
    let s = source.clone();
    step_until(&mut coord, Phase::FetchingPage, move |p| {
        matches!(p, Phase::Sleeping) && s.calls().len() == 4
    })
    .await;

    assert_eq!(
        source.calls(),
        vec![Call::Page(1), Call::Page(2), Call::Page(1), Call::Page(2)]
    );
    assert_eq!(counters.hits(), 4);
    assert_eq!(counters.misses(), 0);
    // every field of every asset was still attempted, twice
    let per_asset = crate::flatten::flatten(&AssetSnapshot::default()).len();
    assert_eq!(store.attempts.load(Ordering::SeqCst), 2 * 2 * per_asset);
}
