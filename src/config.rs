use std::env;
use std::thread;
use std::time::Duration;

use dotenvy::dotenv;

/// All knobs the pipeline reads. Constructed once and passed into the
/// dispatcher and cache manager, never read from globals.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// frames per second of the replay clock
    pub fps: u32,
    /// base batch size for durable frame writes, scaled by frame count
    pub db_batch_size: usize,
    /// upper bound on concurrent per-driver synchronization workers
    pub max_workers: usize,
    pub enable_database_cache: bool,
    pub enable_memory_cache: bool,
    /// capacity of the in-memory tier, in cached sessions
    pub memory_cache_entries: usize,
    /// durable write attempts per batch before giving up
    pub persist_attempts: u32,
    /// backoff before the first retry, doubled on each further attempt
    pub retry_backoff: Duration,
    /// timeout applied to every provider request
    pub provider_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            fps: 25,
            db_batch_size: 100,
            max_workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            enable_database_cache: true,
            enable_memory_cache: true,
            memory_cache_entries: 8,
            persist_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// # load the config from the environment
    /// reads the `.env` file first, any variable not set keeps its default
    ///
    /// ## Returns
    /// * `PipelineConfig` - the resolved config
    pub fn from_env() -> PipelineConfig {
        dotenv().ok();

        let mut config = PipelineConfig::default();

        if let Some(fps) = parse_var("FPS") {
            config.fps = fps;
        }
        if let Some(batch) = parse_var("DB_BATCH_SIZE") {
            config.db_batch_size = batch;
        }
        if let Some(workers) = parse_var("MAX_WORKERS") {
            config.max_workers = workers;
        }
        if let Some(enabled) = parse_var("ENABLE_DATABASE_CACHE") {
            config.enable_database_cache = enabled;
        }
        if let Some(enabled) = parse_var("ENABLE_MEMORY_CACHE") {
            config.enable_memory_cache = enabled;
        }
        if let Some(entries) = parse_var("MEMORY_CACHE_ENTRIES") {
            config.memory_cache_entries = entries;
        }

        config
    }

    /// durable writes go out in batches sized to the total frame count:
    /// half the base size for small sets, double for large ones
    pub fn batch_size_for(&self, frame_count: usize) -> usize {
        if frame_count < 500 {
            (self.db_batch_size / 2).max(1)
        } else if frame_count <= 2000 {
            self.db_batch_size
        } else {
            self.db_batch_size * 2
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}
