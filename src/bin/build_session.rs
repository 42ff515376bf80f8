use std::env;
use std::str::FromStr;
use std::sync::Arc;

use dotenvy::dotenv;
use log::{error, info};

use f1_replay_core::config::PipelineConfig;
use f1_replay_core::modules::cache::CacheManager;
use f1_replay_core::modules::events::LogSink;
use f1_replay_core::modules::helpers::logging::setup_logging;
use f1_replay_core::modules::models::telemetry::{SessionQuery, SessionType};
use f1_replay_core::modules::session_api::HttpSessionProvider;
use f1_replay_core::modules::store::DbStore;

/// build and cache one session: `build_session <year> <round> <type>`
#[tokio::main]
async fn main() {
    dotenv().ok();
    setup_logging().expect("failed to setup logging");

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: build_session <year> <round> <R|Q|S|FP1|FP2|FP3>");
        return;
    }

    let year: i32 = args[1].parse().expect("year must be a number");
    let round: i32 = args[2].parse().expect("round must be a number");
    let session_type = SessionType::from_str(&args[3]).expect("unknown session type");
    let query = SessionQuery::new(year, round, session_type);

    let config = PipelineConfig::from_env();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let provider_url = env::var("PROVIDER_URL").expect("PROVIDER_URL must be set");

    let provider = Arc::new(HttpSessionProvider::new(&provider_url, &config));
    let manager = CacheManager::new(
        config,
        Arc::new(DbStore::new(&database_url)),
        Arc::new(LogSink {}),
    );

    match manager.get(provider, &query).await {
        Ok(outcome) => {
            info!(
                target: "build_session",
                "served {} frames for {} from {:?} (persistence: {:?})",
                outcome.frames.frames.len(),
                outcome.frames.key,
                outcome.source,
                outcome.persistence
            );
            if outcome.frames.degraded {
                info!(
                    target: "build_session",
                    "degraded result, failed drivers: {:?}",
                    outcome.frames.failed_drivers
                );
            }
        }
        Err(err) => {
            error!(target: "build_session", "failed building session {}: {}", query, err);
        }
    }
}
