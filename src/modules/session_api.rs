use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{info, warn};
use serde::Deserialize;

use crate::config::PipelineConfig;
use crate::errors::{CustomResult, Error};
use crate::modules::models::telemetry::{
    Driver, Session, SessionQuery, TelemetrySample, TrackStatus, TrackStatusEvent,
};

/// a validated session plus its raw per-driver telemetry streams
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub session: Session,
    /// raw samples per driver code, sorted by time
    pub telemetry: HashMap<String, Vec<TelemetrySample>>,
}

/// the provider boundary. everything behind it is unvalidated, everything
/// in front of it operates on the validated schema only
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn load_session(&self, query: &SessionQuery) -> CustomResult<LoadedSession>;
}

/// http provider client
pub struct HttpSessionProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSessionProvider {
    pub fn new(base_url: &str, config: &PipelineConfig) -> HttpSessionProvider {
        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()
            .unwrap_or_default();

        HttpSessionProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn load_session(&self, query: &SessionQuery) -> CustomResult<LoadedSession> {
        info!(target: "session_api", "Getting session {} from provider", query);

        let request_url = format!(
            "{}/sessions?year={}&round={}&type={}",
            self.base_url, query.year, query.round_number, query.session_type
        );

        let response = self
            .client
            .get(&request_url)
            .send()
            .await
            .map_err(|err| Error::DataUnavailableError {
                session: query.to_string(),
                message: err.to_string(),
            })?;

        let raw: RawSessionResponse =
            response
                .json()
                .await
                .map_err(|err| Error::DataUnavailableError {
                    session: query.to_string(),
                    message: format!("invalid provider payload: {err}"),
                })?;

        validate_response(query, raw)
    }
}

/// # validate a raw provider response
/// all required fields are checked here, before anything enters the
/// pipeline. a session never leaves this function half-validated.
///
/// ## Arguments
/// * `query` - the query the response answers
/// * `raw` - the deserialized provider payload
///
/// ## Returns
/// * `LoadedSession` - validated session plus sorted telemetry streams
pub fn validate_response(
    query: &SessionQuery,
    raw: RawSessionResponse,
) -> CustomResult<LoadedSession> {
    let info = raw.session;

    if info.event_name.trim().is_empty() {
        return Err(validation("event_name", "missing event name"));
    }
    if info.round_number <= 0 {
        return Err(validation("round_number", "round number must be positive"));
    }
    let event_date = NaiveDate::parse_from_str(&info.event_date, "%Y-%m-%d")
        .map_err(|err| validation("event_date", &format!("unparseable date: {err}")))?;
    if raw.drivers.is_empty() {
        return Err(validation("drivers", "session has no drivers"));
    }
    if info.end_time <= info.start_time {
        return Err(validation("end_time", "session window is empty"));
    }

    let mut track_statuses: Vec<TrackStatusEvent> = raw
        .track_statuses
        .iter()
        .filter_map(|event| match TrackStatus::from_code(&event.status) {
            Some(status) => Some(TrackStatusEvent {
                time: event.time,
                status,
            }),
            None => {
                warn!(target: "session_api", "unknown track status code '{}' in {}", event.status, query);
                None
            }
        })
        .collect();
    track_statuses.sort_by(|a, b| a.time.total_cmp(&b.time));

    let drivers: Vec<Driver> = raw
        .drivers
        .iter()
        .map(|d| Driver {
            code: d.code.clone(),
            team: d.team.clone().unwrap_or_default(),
        })
        .collect();

    let mut telemetry: HashMap<String, Vec<TelemetrySample>> = HashMap::new();
    for driver in &drivers {
        let mut samples: Vec<TelemetrySample> = raw
            .telemetry
            .get(&driver.code)
            .map(|raw_samples| raw_samples.iter().map(RawTelemetrySample::to_sample).collect())
            .unwrap_or_default();
        samples.sort_by(|a, b| a.time.total_cmp(&b.time));
        telemetry.insert(driver.code.clone(), samples);
    }

    Ok(LoadedSession {
        session: Session {
            year: query.year,
            round_number: info.round_number,
            session_type: query.session_type,
            event_name: info.event_name,
            event_date,
            total_laps: info.total_laps.unwrap_or(0),
            start_time: info.start_time,
            end_time: info.end_time,
            drivers,
            track_statuses,
        },
        telemetry,
    })
}

fn validation(field: &str, message: &str) -> Error {
    Error::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RawSessionResponse {
    #[serde(rename = "Session")]
    pub session: RawSessionInfo,
    #[serde(rename = "Drivers")]
    pub drivers: Vec<RawDriver>,
    #[serde(rename = "TrackStatuses", default)]
    pub track_statuses: Vec<RawTrackStatus>,
    #[serde(rename = "Telemetry", default)]
    pub telemetry: HashMap<String, Vec<RawTelemetrySample>>,
}

#[derive(Debug, Deserialize)]
pub struct RawSessionInfo {
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "RoundNumber")]
    pub round_number: i32,
    #[serde(rename = "EventDate")]
    pub event_date: String,
    #[serde(rename = "TotalLaps")]
    pub total_laps: Option<i32>,
    #[serde(rename = "StartTime")]
    pub start_time: f64,
    #[serde(rename = "EndTime")]
    pub end_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct RawDriver {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Team")]
    pub team: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawTrackStatus {
    #[serde(rename = "Time")]
    pub time: f64,
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RawTelemetrySample {
    #[serde(rename = "Time")]
    pub time: f64,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Speed")]
    pub speed: f64,
    #[serde(rename = "Gear", default)]
    pub gear: i32,
    #[serde(rename = "Throttle", default)]
    pub throttle: f64,
    #[serde(rename = "Brake", default)]
    pub brake: f64,
    #[serde(rename = "DRS", default)]
    pub drs: i32,
    #[serde(rename = "Distance", default)]
    pub distance: f64,
}

impl RawTelemetrySample {
    fn to_sample(&self) -> TelemetrySample {
        TelemetrySample {
            time: self.time,
            x: self.x,
            y: self.y,
            speed: self.speed,
            gear: self.gear,
            throttle: self.throttle,
            brake: self.brake,
            drs: self.drs,
            distance: self.distance,
        }
    }
}
