use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// session kind as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    R,
    Q,
    S,
    FP1,
    FP2,
    FP3,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::R => "R",
            SessionType::Q => "Q",
            SessionType::S => "S",
            SessionType::FP1 => "FP1",
            SessionType::FP2 => "FP2",
            SessionType::FP3 => "FP3",
        }
    }
}

impl FromStr for SessionType {
    type Err = Error;

    fn from_str(value: &str) -> Result<SessionType, Error> {
        match value {
            "R" => Ok(SessionType::R),
            "Q" => Ok(SessionType::Q),
            "S" => Ok(SessionType::S),
            "FP1" => Ok(SessionType::FP1),
            "FP2" => Ok(SessionType::FP2),
            "FP3" => Ok(SessionType::FP3),
            other => Err(Error::ValidationError {
                field: "session_type".to_string(),
                message: format!("unknown session type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// identity of a session at the provider boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionQuery {
    pub year: i32,
    pub round_number: i32,
    pub session_type: SessionType,
}

impl SessionQuery {
    pub fn new(year: i32, round_number: i32, session_type: SessionType) -> SessionQuery {
        SessionQuery {
            year,
            round_number,
            session_type,
        }
    }

    /// extend the query into a full cache key. everything that affects the
    /// computed frames has to be part of the key, so fps goes in here.
    pub fn with_fps(&self, fps: u32) -> SessionKey {
        SessionKey {
            year: self.year,
            round_number: self.round_number,
            session_type: self.session_type,
            fps,
        }
    }
}

impl fmt::Display for SessionQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} round {} {}", self.year, self.round_number, self.session_type)
    }
}

/// cache key of one computed frame sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub year: i32,
    pub round_number: i32,
    pub session_type: SessionType,
    pub fps: u32,
}

impl SessionKey {
    pub fn query(&self) -> SessionQuery {
        SessionQuery {
            year: self.year,
            round_number: self.round_number,
            session_type: self.session_type,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} round {} {} @{}fps",
            self.year, self.round_number, self.session_type, self.fps
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub code: String,
    pub team: String,
}

/// one raw provider sample. irregular rate, per driver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub gear: i32,
    pub throttle: f64,
    pub brake: f64,
    pub drs: i32,
    pub distance: f64,
}

/// race control state, mapped from the provider status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    AllClear,
    Yellow,
    SafetyCar,
    Red,
    VirtualSafetyCar,
    VscEnding,
}

impl TrackStatus {
    pub fn from_code(code: &str) -> Option<TrackStatus> {
        match code {
            "1" => Some(TrackStatus::AllClear),
            "2" => Some(TrackStatus::Yellow),
            "4" => Some(TrackStatus::SafetyCar),
            "5" => Some(TrackStatus::Red),
            "6" => Some(TrackStatus::VirtualSafetyCar),
            "7" => Some(TrackStatus::VscEnding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackStatusEvent {
    pub time: f64,
    pub status: TrackStatus,
}

/// a validated session. immutable once it leaves the loader boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub year: i32,
    pub round_number: i32,
    pub session_type: SessionType,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub total_laps: i32,
    /// session time bounds in seconds, frame times live inside these
    pub start_time: f64,
    pub end_time: f64,
    pub drivers: Vec<Driver>,
    /// ordered by time, the single status timeline for the whole session
    pub track_statuses: Vec<TrackStatusEvent>,
}

/// one driver's state at one frame instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub gear: i32,
    pub throttle: f64,
    pub brake: f64,
    pub drs: i32,
    pub distance: f64,
    pub lap: i32,
    /// leaderboard rank, 1 = leader
    pub position: u32,
    /// seconds behind the leader, None while unclassified
    pub gap_to_leader: Option<f64>,
    /// false once the stream ran out and values are held
    pub active: bool,
}

/// one instant of the uniform replay timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub frame_index: u32,
    pub time: f64,
    pub track_status: TrackStatus,
    /// keyed by driver code. BTreeMap keeps serialization deterministic
    pub drivers: BTreeMap<String, DriverSnapshot>,
}

/// the complete ordered frame sequence for one session, the unit of caching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSet {
    pub key: SessionKey,
    pub fps: u32,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub total_laps: i32,
    pub driver_colors: BTreeMap<String, (u8, u8, u8)>,
    pub track_statuses: Vec<TrackStatusEvent>,
    pub frames: Vec<Frame>,
    /// true if one or more drivers could not be synchronized
    pub degraded: bool,
    pub failed_drivers: Vec<String>,
}
