use std::sync::Arc;

use log::warn;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::errors::{CustomResult, Error};
use crate::modules::enrich::Enricher;
use crate::modules::events::{EventSink, PipelineEvent};
use crate::modules::models::telemetry::{FrameSet, SessionKey};
use crate::modules::session_api::SessionProvider;
use crate::modules::sync::{resample_driver, FrameClock, SyncedStream};

/// Orchestrates one session build: load, fan out per-driver synchronization
/// over a bounded worker pool, barrier, then a single enrichment pass.
pub struct Dispatcher {
    config: PipelineConfig,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(config: PipelineConfig, sink: Arc<dyn EventSink>) -> Dispatcher {
        Dispatcher { config, sink }
    }

    /// # build the frame set for one session
    /// per-driver failures are contained: the affected driver is dropped,
    /// recorded on the result, and the build continues. provider and
    /// validation failures abort the build.
    ///
    /// ## Arguments
    /// * `provider` - the session loader boundary
    /// * `key` - the session plus the fps it is rendered at
    ///
    /// ## Returns
    /// * `FrameSet` - the enriched replay, flagged degraded on partial failure
    pub async fn build(
        &self,
        provider: &dyn SessionProvider,
        key: &SessionKey,
    ) -> CustomResult<FrameSet> {
        if key.fps == 0 {
            return Err(Error::ValidationError {
                field: "fps".to_string(),
                message: "fps must be positive".to_string(),
            });
        }

        self.sink.emit(&PipelineEvent::BuildStarted { key: *key });

        let loaded = provider.load_session(&key.query()).await?;
        let clock = FrameClock::new(
            loaded.session.start_time,
            loaded.session.end_time,
            key.fps,
        );

        // fan out, one worker per driver, bounded by the pool size
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut tasks: JoinSet<(String, CustomResult<SyncedStream>)> = JoinSet::new();

        for driver in &loaded.session.drivers {
            let code = driver.code.clone();
            let samples = loaded
                .telemetry
                .get(&code)
                .cloned()
                .unwrap_or_default();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            code.clone(),
                            Err(Error::PartialComputationError {
                                driver: code,
                                message: "worker pool closed".to_string(),
                            }),
                        );
                    }
                };
                let stream = resample_driver(&code, &samples, &clock);
                (code, stream)
            });
        }

        // barrier: enrichment needs every surviving stream
        let mut streams: Vec<SyncedStream> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(stream))) => streams.push(stream),
                Ok((driver, Err(err))) => {
                    self.sink.emit(&PipelineEvent::PartialFailure {
                        key: *key,
                        driver: driver.clone(),
                        message: err.to_string(),
                    });
                    failed.push(driver);
                }
                Err(err) => {
                    warn!(target: "dispatcher", "synchronization worker died: {}", err);
                }
            }
        }

        // join order is nondeterministic, restore a stable order
        streams.sort_by(|a, b| a.driver.cmp(&b.driver));
        failed.sort();

        let set = Enricher::enrich(*key, &loaded.session, &streams, failed, &clock);
        self.sink.emit(&PipelineEvent::BuildCompleted {
            key: *key,
            frames: set.frames.len(),
            degraded: set.degraded,
        });

        Ok(set)
    }
}
