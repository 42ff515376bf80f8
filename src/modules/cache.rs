use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use crate::config::PipelineConfig;
use crate::errors::{CustomResult, Error};
use crate::modules::dispatcher::Dispatcher;
use crate::modules::events::{CacheTier, EventSink, PipelineEvent};
use crate::modules::models::telemetry::{FrameSet, SessionKey, SessionQuery};
use crate::modules::session_api::SessionProvider;
use crate::modules::store::{FrameStore, StoreResult};

/// where a served frame set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Database,
    Computed,
}

/// durability of a served frame set
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceStatus {
    /// written to the durable tier, with the number of retries it took
    Persisted { retries: u32 },
    /// durable tier disabled by config
    Disabled,
    /// retries exhausted, the result lives in the memory tier only
    Failed { attempts: u32, message: String },
    /// nothing to persist, the result came out of a cache tier
    NotAttempted,
}

/// what a caller gets back: the frames plus how they were obtained
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub frames: Arc<FrameSet>,
    pub source: CacheSource,
    pub persistence: PersistenceStatus,
}

/// payload shared with every waiter attached to one in-flight build
type BuildOutcome = Result<(Arc<FrameSet>, PersistenceStatus), Error>;

/// Two-tier cache over the frame pipeline. Owns the at-most-one-build-per-key
/// guarantee: concurrent requests for the same key attach to the same
/// in-flight computation, requests for different keys proceed in parallel.
pub struct CacheManager {
    config: PipelineConfig,
    store: Arc<dyn FrameStore>,
    sink: Arc<dyn EventSink>,
    dispatcher: Dispatcher,
    memory: Mutex<MemoryTier>,
    inflight: Mutex<HashMap<SessionKey, Arc<watch::Sender<Option<BuildOutcome>>>>>,
    // the single writer path to the durable tier: persist and invalidate
    // take this lock, so store writes for different keys never interleave
    writer: AsyncMutex<()>,
}

impl CacheManager {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn FrameStore>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<CacheManager> {
        let memory = MemoryTier::new(config.memory_cache_entries);
        let dispatcher = Dispatcher::new(config.clone(), sink.clone());

        Arc::new(CacheManager {
            config,
            store,
            sink,
            dispatcher,
            memory: Mutex::new(memory),
            inflight: Mutex::new(HashMap::new()),
            writer: AsyncMutex::new(()),
        })
    }

    /// the full cache key a query resolves to under this manager's config
    pub fn key_for(&self, query: &SessionQuery) -> SessionKey {
        query.with_fps(self.config.fps)
    }

    /// # serve the frame set for a session
    /// lookup order: memory tier, durable tier, recompute. a recompute is
    /// written to both enabled tiers before any caller sees it. dropping the
    /// returned future detaches this caller, the build itself is only
    /// cancelled once every attached caller is gone.
    ///
    /// ## Arguments
    /// * `provider` - the session loader used on a full miss
    /// * `query` - the session identity, extended with the configured fps
    ///
    /// ## Returns
    /// * `LoadOutcome` - frames plus source tier and persistence status
    pub async fn get(
        self: &Arc<Self>,
        provider: Arc<dyn SessionProvider>,
        query: &SessionQuery,
    ) -> CustomResult<LoadOutcome> {
        let key = self.key_for(query);
        let mut attach_retries = 0;

        loop {
            match self.lookup_tiers(&key) {
                Ok(outcome) => return Ok(outcome),
                Err(Error::CacheMissError) => {}
                Err(err) => return Err(err),
            }

            let mut rx = {
                let mut inflight = self.inflight.lock().unwrap();
                match inflight.get(&key) {
                    Some(tx) => tx.subscribe(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        let tx = Arc::new(tx);
                        inflight.insert(key, tx.clone());

                        let manager = Arc::clone(self);
                        let provider = Arc::clone(&provider);
                        tokio::spawn(async move {
                            manager.run_build(provider, key, tx).await;
                        });

                        rx
                    }
                }
            };

            match Self::wait_for_build(&mut rx).await {
                Some(Ok((frames, persistence))) => {
                    return Ok(LoadOutcome {
                        frames,
                        source: CacheSource::Computed,
                        persistence,
                    });
                }
                Some(Err(err)) => return Err(err),
                // the build we attached to was cancelled before finishing,
                // start over (a tier may answer by now)
                None => {
                    attach_retries += 1;
                    if attach_retries > 3 {
                        return Err(Error::BuildFailedError {
                            message: format!("build for {key} kept getting cancelled"),
                        });
                    }
                    continue;
                }
            }
        }
    }

    /// # explicitly drop a cached session
    /// clears both tiers. there is no implicit expiry
    pub async fn invalidate(&self, key: &SessionKey) -> CustomResult<()> {
        self.memory.lock().unwrap().remove(key);

        let _writer = self.writer.lock().await;
        self.store.delete(key).map_err(|err| Error::PersistenceError {
            attempts: 1,
            message: err.message,
        })
    }

    /// # enumerate the sessions in the durable tier
    ///
    /// ## Returns
    /// * `Vec<SessionKey>` - every persisted key, ordered by year then round
    pub fn cached_sessions(&self) -> CustomResult<Vec<SessionKey>> {
        self.store
            .list_sessions()
            .map_err(|err| Error::DataUnavailableError {
                session: "all".to_string(),
                message: err.message,
            })
    }

    fn lookup_tiers(&self, key: &SessionKey) -> CustomResult<LoadOutcome> {
        if self.config.enable_memory_cache {
            if let Some(frames) = self.memory.lock().unwrap().get(key) {
                self.sink.emit(&PipelineEvent::CacheHit {
                    key: *key,
                    tier: CacheTier::Memory,
                });
                return Ok(LoadOutcome {
                    frames,
                    source: CacheSource::Memory,
                    persistence: PersistenceStatus::NotAttempted,
                });
            }
        }

        if self.config.enable_database_cache {
            match self.store.load(key) {
                Ok(Some(set)) => {
                    let frames = Arc::new(set);
                    if self.config.enable_memory_cache {
                        self.memory.lock().unwrap().insert(*key, frames.clone());
                    }
                    self.sink.emit(&PipelineEvent::CacheHit {
                        key: *key,
                        tier: CacheTier::Database,
                    });
                    return Ok(LoadOutcome {
                        frames,
                        source: CacheSource::Database,
                        persistence: PersistenceStatus::NotAttempted,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    // a broken durable tier degrades to a miss
                    warn!(target: "cache", "durable tier read failed for {}: {}", key, err);
                }
            }
        }

        Err(Error::CacheMissError)
    }

    async fn run_build(
        self: Arc<Self>,
        provider: Arc<dyn SessionProvider>,
        key: SessionKey,
        tx: Arc<watch::Sender<Option<BuildOutcome>>>,
    ) {
        let build = async {
            let set = Arc::new(self.dispatcher.build(provider.as_ref(), &key).await?);

            // populate both tiers before any caller is released
            if self.config.enable_memory_cache {
                self.memory.lock().unwrap().insert(key, set.clone());
            }
            let persistence = if self.config.enable_database_cache {
                self.persist(&set).await
            } else {
                PersistenceStatus::Disabled
            };

            Ok((set, persistence))
        };

        tokio::select! {
            outcome = build => {
                let _ = tx.send(Some(outcome));
            }
            // every attached caller cancelled, abandon the build
            _ = tx.closed() => {
                warn!(target: "cache", "build for {} cancelled by all callers", key);
            }
        }

        self.inflight.lock().unwrap().remove(&key);
    }

    async fn wait_for_build(
        rx: &mut watch::Receiver<Option<BuildOutcome>>,
    ) -> Option<BuildOutcome> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return Some(outcome);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// # write one frame set to the durable tier
    /// batched through the single writer path, every batch retried with
    /// exponential backoff. exhausting the retries keeps the in-memory
    /// result and reports the failure instead of discarding work.
    async fn persist(&self, set: &Arc<FrameSet>) -> PersistenceStatus {
        // builds for different keys run in parallel, their store writes do not
        let _writer = self.writer.lock().await;

        let batch_size = self.config.batch_size_for(set.frames.len());
        let mut retries = 0;

        let session_id = match self.with_retry(&set.key, &mut retries, || {
            self.store.begin_session(set)
        })
        .await
        {
            Ok(id) => id,
            Err(status) => return status,
        };

        for batch in set.frames.chunks(batch_size) {
            let written = self
                .with_retry(&set.key, &mut retries, || {
                    self.store.write_frame_batch(session_id, batch)
                })
                .await;
            if let Err(status) = written {
                return status;
            }
        }

        PersistenceStatus::Persisted { retries }
    }

    async fn with_retry<T, F>(
        &self,
        key: &SessionKey,
        retries: &mut u32,
        operation: F,
    ) -> Result<T, PersistenceStatus>
    where
        F: Fn() -> StoreResult<T>,
    {
        let attempts = self.config.persist_attempts.max(1);
        let mut backoff = self.config.retry_backoff;

        for attempt in 1..=attempts {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if attempt == attempts => {
                    self.sink.emit(&PipelineEvent::RetryExhausted {
                        key: *key,
                        attempts,
                    });
                    return Err(PersistenceStatus::Failed {
                        attempts,
                        message: err.message,
                    });
                }
                Err(_) => {
                    self.sink.emit(&PipelineEvent::PersistRetry {
                        key: *key,
                        attempt,
                    });
                    *retries += 1;
                    sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        unreachable!("retry loop always returns")
    }
}

/// bounded, recency-evicted in-memory tier
struct MemoryTier {
    capacity: usize,
    entries: HashMap<SessionKey, Arc<FrameSet>>,
    order: VecDeque<SessionKey>,
}

impl MemoryTier {
    fn new(capacity: usize) -> MemoryTier {
        MemoryTier {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &SessionKey) -> Option<Arc<FrameSet>> {
        let frames = self.entries.get(key)?.clone();
        self.touch(key);
        Some(frames)
    }

    fn insert(&mut self, key: SessionKey, frames: Arc<FrameSet>) {
        if self.entries.insert(key, frames).is_none() {
            self.order.push_back(key);
        } else {
            self.touch(&key);
        }

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn remove(&mut self, key: &SessionKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    fn touch(&mut self, key: &SessionKey) {
        self.order.retain(|k| k != key);
        self.order.push_back(*key);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::errors::CustomResult;
    use crate::modules::events::testing::RecordingSink;
    use crate::modules::models::telemetry::{
        Driver, Frame, Session, SessionType, TelemetrySample,
    };
    use crate::modules::session_api::{LoadedSession, SessionProvider};
    use crate::modules::store::{MemStore, StoreError};

    /// provider that counts how often it is asked to load
    struct CountingProvider {
        calls: AtomicU32,
        end_time: f64,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(end_time: f64) -> CountingProvider {
            CountingProvider {
                calls: AtomicU32::new(0),
                end_time,
                delay: Duration::ZERO,
            }
        }

        fn slow(end_time: f64, delay: Duration) -> CountingProvider {
            CountingProvider {
                calls: AtomicU32::new(0),
                end_time,
                delay,
            }
        }
    }

    #[async_trait]
    impl SessionProvider for CountingProvider {
        async fn load_session(&self, _query: &SessionQuery) -> CustomResult<LoadedSession> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let end = self.end_time;
            let mut telemetry = StdHashMap::new();
            telemetry.insert(
                "VER".to_string(),
                vec![
                    TelemetrySample {
                        time: 0.0,
                        x: 0.0,
                        y: 0.0,
                        speed: 0.0,
                        gear: 1,
                        throttle: 0.0,
                        brake: 0.0,
                        drs: 0,
                        distance: 0.0,
                    },
                    TelemetrySample {
                        time: end,
                        x: end * 100.0,
                        y: 0.0,
                        speed: 300.0,
                        gear: 8,
                        throttle: 100.0,
                        brake: 0.0,
                        drs: 1,
                        distance: end * 100.0,
                    },
                ],
            );

            Ok(LoadedSession {
                session: Session {
                    year: 2024,
                    round_number: 5,
                    session_type: SessionType::R,
                    event_name: "Test Grand Prix".to_string(),
                    event_date: NaiveDate::from_ymd_opt(2024, 4, 21).unwrap(),
                    total_laps: 1,
                    start_time: 0.0,
                    end_time: end,
                    drivers: vec![Driver {
                        code: "VER".to_string(),
                        team: "Red Bull Racing".to_string(),
                    }],
                    track_statuses: vec![],
                },
                telemetry,
            })
        }
    }

    /// store that fails the first `failures` frame batch writes
    struct FlakyStore {
        inner: MemStore,
        failures: AtomicU32,
        batch_writes: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> FlakyStore {
            FlakyStore {
                inner: MemStore::new(),
                failures: AtomicU32::new(failures),
                batch_writes: AtomicU32::new(0),
            }
        }
    }

    impl FrameStore for FlakyStore {
        fn load(&self, key: &SessionKey) -> StoreResult<Option<FrameSet>> {
            self.inner.load(key)
        }

        fn begin_session(&self, set: &FrameSet) -> StoreResult<i32> {
            self.inner.begin_session(set)
        }

        fn write_frame_batch(&self, session_id: i32, frames: &[Frame]) -> StoreResult<()> {
            self.batch_writes.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError {
                    message: "transient write failure".to_string(),
                });
            }
            self.inner.write_frame_batch(session_id, frames)
        }

        fn delete(&self, key: &SessionKey) -> StoreResult<()> {
            self.inner.delete(key)
        }

        fn list_sessions(&self) -> StoreResult<Vec<SessionKey>> {
            self.inner.list_sessions()
        }
    }

    /// store that tracks how many writers are inside it at once
    struct OverlapStore {
        inner: MemStore,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl OverlapStore {
        fn new() -> OverlapStore {
            OverlapStore {
                inner: MemStore::new(),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
            }
        }

        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            // dwell inside the write so overlapping writers would be seen
            std::thread::sleep(Duration::from_millis(5));
        }

        fn leave(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FrameStore for OverlapStore {
        fn load(&self, key: &SessionKey) -> StoreResult<Option<FrameSet>> {
            self.inner.load(key)
        }

        fn begin_session(&self, set: &FrameSet) -> StoreResult<i32> {
            self.enter();
            let result = self.inner.begin_session(set);
            self.leave();
            result
        }

        fn write_frame_batch(&self, session_id: i32, frames: &[Frame]) -> StoreResult<()> {
            self.enter();
            let result = self.inner.write_frame_batch(session_id, frames);
            self.leave();
            result
        }

        fn delete(&self, key: &SessionKey) -> StoreResult<()> {
            self.inner.delete(key)
        }

        fn list_sessions(&self) -> StoreResult<Vec<SessionKey>> {
            self.inner.list_sessions()
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            retry_backoff: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn query() -> SessionQuery {
        SessionQuery::new(2024, 5, SessionType::R)
    }

    #[tokio::test]
    async fn recompute_then_memory_then_database() {
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store.clone(), sink);
        let provider = Arc::new(CountingProvider::new(4.0));

        let first = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(first.source, CacheSource::Computed);
        assert_eq!(first.persistence, PersistenceStatus::Persisted { retries: 0 });
        assert_eq!(first.frames.frames.len(), 101);

        let second = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(second.source, CacheSource::Memory);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // fresh manager, same durable store: memory is cold, database answers
        let sink = Arc::new(RecordingSink::new());
        let rebuilt = CacheManager::new(fast_config(), store, sink);
        let third = rebuilt.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(third.source, CacheSource::Database);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // round-trip law: the durable tier returns what was computed
        assert_eq!(*third.frames, *first.frames);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_build() {
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store, sink);
        let provider = Arc::new(CountingProvider::slow(4.0, Duration::from_millis(50)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                manager.get(provider, &query()).await
            }));
        }

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.frames.frames.len(), 101);
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried_and_reported() {
        let store = Arc::new(FlakyStore::new(2));
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store.clone(), sink.clone());
        let provider = Arc::new(CountingProvider::new(4.0));

        let outcome = manager.get(provider, &query()).await.unwrap();

        assert_eq!(outcome.persistence, PersistenceStatus::Persisted { retries: 2 });
        assert_eq!(
            sink.count(|e| matches!(e, PipelineEvent::PersistRetry { .. })),
            2
        );

        // no data loss: the durable copy is complete
        let key = manager.key_for(&query());
        let stored = store.load(&key).unwrap().unwrap();
        assert_eq!(stored.frames.len(), 101);
    }

    #[tokio::test]
    async fn exhausted_retries_keep_the_memory_result() {
        // enough failures to exhaust every attempt on the first batch
        let store = Arc::new(FlakyStore::new(100));
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store, sink.clone());
        let provider = Arc::new(CountingProvider::new(4.0));

        let outcome = manager.get(provider.clone(), &query()).await.unwrap();

        assert!(matches!(
            outcome.persistence,
            PersistenceStatus::Failed { attempts: 3, .. }
        ));
        assert_eq!(outcome.frames.frames.len(), 101);
        assert_eq!(
            sink.count(|e| matches!(e, PipelineEvent::RetryExhausted { .. })),
            1
        );

        // the computed result still serves from the memory tier
        let again = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(again.source, CacheSource::Memory);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_count_follows_the_size_policy() {
        // 72s at 25fps resolves to exactly 1801 frames
        let store = Arc::new(FlakyStore::new(0));
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store.clone(), sink);
        let provider = Arc::new(CountingProvider::new(72.0));

        let outcome = manager.get(provider, &query()).await.unwrap();

        assert_eq!(outcome.frames.frames.len(), 1801);
        // 1801 frames sit in the 500..=2000 tier, batches of 100
        assert_eq!(store.batch_writes.load(Ordering::SeqCst), 19);
    }

    #[tokio::test]
    async fn disabled_tiers_always_recompute() {
        let config = PipelineConfig {
            enable_memory_cache: false,
            enable_database_cache: false,
            ..fast_config()
        };
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(config, store, sink);
        let provider = Arc::new(CountingProvider::new(4.0));

        let first = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(first.source, CacheSource::Computed);
        assert_eq!(first.persistence, PersistenceStatus::Disabled);

        let second = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(second.source, CacheSource::Computed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_forces_a_rebuild() {
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store, sink);
        let provider = Arc::new(CountingProvider::new(4.0));

        manager.get(provider.clone(), &query()).await.unwrap();
        manager.invalidate(&manager.key_for(&query())).await.unwrap();

        let rebuilt = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(rebuilt.source, CacheSource::Computed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn durable_writes_for_different_keys_never_overlap() {
        let store = Arc::new(OverlapStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store.clone(), sink);
        let provider = Arc::new(CountingProvider::new(4.0));

        let round_5 = SessionQuery::new(2024, 5, SessionType::R);
        let round_6 = SessionQuery::new(2024, 6, SessionType::R);

        let first = {
            let manager = manager.clone();
            let provider = provider.clone();
            tokio::spawn(async move { manager.get(provider, &round_5).await })
        };
        let second = {
            let manager = manager.clone();
            let provider = provider.clone();
            tokio::spawn(async move { manager.get(provider, &round_6).await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.persistence, PersistenceStatus::Persisted { retries: 0 });
        assert_eq!(second.persistence, PersistenceStatus::Persisted { retries: 0 });

        // the builds ran in parallel, their store writes did not
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detached_caller_leaves_the_shared_build_running() {
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store, sink);
        let provider = Arc::new(CountingProvider::slow(4.0, Duration::from_millis(100)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                manager.get(provider, &query()).await
            }));
        }

        // let every caller attach, then drop one of them
        tokio::time::sleep(Duration::from_millis(20)).await;
        handles.remove(0).abort();

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.frames.frames.len(), 101);
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_build_is_cancelled_and_rebuilt() {
        let store = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(
            fast_config(),
            store.clone() as Arc<dyn FrameStore>,
            sink,
        );
        let provider = Arc::new(CountingProvider::slow(4.0, Duration::from_millis(200)));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = manager.clone();
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                manager.get(provider, &query()).await
            }));
        }

        // drop every caller while the build is still loading
        tokio::time::sleep(Duration::from_millis(20)).await;
        for handle in handles {
            handle.abort();
        }

        // past the point an uncancelled build would have persisted
        tokio::time::sleep(Duration::from_millis(300)).await;
        let key = manager.key_for(&query());
        assert!(store.load(&key).unwrap().is_none());

        // the next request starts over
        let rebuilt = manager.get(provider.clone(), &query()).await.unwrap();
        assert_eq!(rebuilt.source, CacheSource::Computed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cached_sessions_lists_the_durable_tier() {
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(fast_config(), store, sink);
        let provider = Arc::new(CountingProvider::new(4.0));

        let round_5 = SessionQuery::new(2024, 5, SessionType::R);
        let round_6 = SessionQuery::new(2024, 6, SessionType::R);

        manager.get(provider.clone(), &round_6).await.unwrap();
        manager.get(provider.clone(), &round_5).await.unwrap();

        let keys = manager.cached_sessions().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].round_number, 5);
        assert_eq!(keys[1].round_number, 6);
    }

    #[tokio::test]
    async fn memory_tier_evicts_least_recently_used() {
        let config = PipelineConfig {
            memory_cache_entries: 1,
            enable_database_cache: false,
            ..fast_config()
        };
        let store: Arc<dyn FrameStore> = Arc::new(MemStore::new());
        let sink = Arc::new(RecordingSink::new());
        let manager = CacheManager::new(config, store, sink);
        let provider = Arc::new(CountingProvider::new(4.0));

        let round_5 = SessionQuery::new(2024, 5, SessionType::R);
        let round_6 = SessionQuery::new(2024, 6, SessionType::R);

        manager.get(provider.clone(), &round_5).await.unwrap();
        manager.get(provider.clone(), &round_6).await.unwrap();

        // round 5 was evicted by round 6, round 6 still hits
        let hit = manager.get(provider.clone(), &round_6).await.unwrap();
        assert_eq!(hit.source, CacheSource::Memory);

        let miss = manager.get(provider.clone(), &round_5).await.unwrap();
        assert_eq!(miss.source, CacheSource::Computed);
    }
}
