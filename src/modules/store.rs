use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use diesel::{Connection, PgConnection};

use crate::modules::models::frame::{FrameRow, NewFrameRow};
use crate::modules::models::session::{NewSessionRow, SessionRow};
use crate::modules::models::telemetry::{Frame, FrameSet, SessionKey, SessionType};

/// transient durable-tier failure. the cache manager's retry policy decides
/// when it becomes a `PersistenceError`
#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub message: String,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> StoreError {
        StoreError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> StoreError {
        StoreError {
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The durable tier seam. Writes go through a single writer path in the
/// cache manager, one batch per call.
pub trait FrameStore: Send + Sync {
    /// load a complete frame set, None when the key is absent
    fn load(&self, key: &SessionKey) -> StoreResult<Option<FrameSet>>;

    /// create the session record (replacing any stale one) and return the
    /// id that frame batches are written under
    fn begin_session(&self, set: &FrameSet) -> StoreResult<i32>;

    /// append one batch of frames to a session started via `begin_session`
    fn write_frame_batch(&self, session_id: i32, frames: &[Frame]) -> StoreResult<()>;

    /// drop a session and all of its frames
    fn delete(&self, key: &SessionKey) -> StoreResult<()>;

    /// every session key present in the store, ordered by year then round
    fn list_sessions(&self) -> StoreResult<Vec<SessionKey>>;
}

/// postgres-backed durable tier
pub struct DbStore {
    database_url: String,
}

impl DbStore {
    pub fn new(database_url: &str) -> DbStore {
        DbStore {
            database_url: database_url.to_string(),
        }
    }

    fn connect(&self) -> StoreResult<PgConnection> {
        PgConnection::establish(&self.database_url).map_err(|err| StoreError {
            message: err.to_string(),
        })
    }

    fn row_to_frameset(conn: &mut PgConnection, row: SessionRow) -> StoreResult<FrameSet> {
        let session_type = SessionType::from_str(&row.session_type).map_err(|err| StoreError {
            message: err.to_string(),
        })?;

        let mut frames = Vec::new();
        for frame_row in FrameRow::for_session(conn, row.id)? {
            frames.push(frame_row.to_frame()?);
        }

        Ok(FrameSet {
            key: SessionKey {
                year: row.year,
                round_number: row.round_number,
                session_type,
                fps: row.fps as u32,
            },
            fps: row.fps as u32,
            event_name: row.event_name,
            event_date: row.event_date,
            total_laps: row.total_laps,
            driver_colors: serde_json::from_value(row.driver_colors)?,
            track_statuses: serde_json::from_value(row.track_statuses)?,
            frames,
            degraded: row.degraded,
            failed_drivers: serde_json::from_value(row.failed_drivers)?,
        })
    }
}

impl FrameStore for DbStore {
    fn load(&self, key: &SessionKey) -> StoreResult<Option<FrameSet>> {
        let conn = &mut self.connect()?;

        match SessionRow::get_by_key(conn, key)? {
            Some(row) => Ok(Some(Self::row_to_frameset(conn, row)?)),
            None => Ok(None),
        }
    }

    fn begin_session(&self, set: &FrameSet) -> StoreResult<i32> {
        let conn = &mut self.connect()?;

        // a rebuild after invalidation replaces whatever is there
        SessionRow::delete_by_key(conn, &set.key)?;

        let row = SessionRow::new(
            conn,
            &NewSessionRow {
                year: set.key.year,
                round_number: set.key.round_number,
                session_type: set.key.session_type.as_str().to_string(),
                fps: set.key.fps as i32,
                event_name: set.event_name.clone(),
                event_date: set.event_date,
                total_laps: set.total_laps,
                driver_colors: serde_json::to_value(&set.driver_colors)?,
                track_statuses: serde_json::to_value(&set.track_statuses)?,
                degraded: set.degraded,
                failed_drivers: serde_json::to_value(&set.failed_drivers)?,
            },
        )?;

        Ok(row.id)
    }

    fn write_frame_batch(&self, session_id: i32, frames: &[Frame]) -> StoreResult<()> {
        let conn = &mut self.connect()?;

        let mut rows = Vec::with_capacity(frames.len());
        for frame in frames {
            rows.push(NewFrameRow::from_frame(session_id, frame)?);
        }
        FrameRow::insert_batch(conn, &rows)?;

        Ok(())
    }

    fn delete(&self, key: &SessionKey) -> StoreResult<()> {
        let conn = &mut self.connect()?;
        SessionRow::delete_by_key(conn, key)?;
        Ok(())
    }

    fn list_sessions(&self) -> StoreResult<Vec<SessionKey>> {
        let conn = &mut self.connect()?;

        let mut keys = Vec::new();
        for row in SessionRow::all(conn)? {
            let session_type =
                SessionType::from_str(&row.session_type).map_err(|err| StoreError {
                    message: err.to_string(),
                })?;
            keys.push(SessionKey {
                year: row.year,
                round_number: row.round_number,
                session_type,
                fps: row.fps as u32,
            });
        }

        Ok(keys)
    }
}

/// in-process durable-tier stand-in. used by the tests and as an ephemeral
/// store when no database is configured
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemStoreInner>,
}

#[derive(Default)]
struct MemStoreInner {
    next_id: i32,
    sessions: HashMap<SessionKey, StoredSession>,
}

struct StoredSession {
    id: i32,
    meta: FrameSet,
    frames: Vec<Frame>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }
}

impl FrameStore for MemStore {
    fn load(&self, key: &SessionKey) -> StoreResult<Option<FrameSet>> {
        let inner = self.inner.lock().unwrap();

        Ok(inner.sessions.get(key).map(|stored| {
            let mut set = stored.meta.clone();
            set.frames = stored.frames.clone();
            set
        }))
    }

    fn begin_session(&self, set: &FrameSet) -> StoreResult<i32> {
        let mut inner = self.inner.lock().unwrap();

        inner.next_id += 1;
        let id = inner.next_id;

        let mut meta = set.clone();
        meta.frames = Vec::new();
        inner.sessions.insert(
            set.key,
            StoredSession {
                id,
                meta,
                frames: Vec::new(),
            },
        );

        Ok(id)
    }

    fn write_frame_batch(&self, session_id: i32, frames: &[Frame]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();

        let stored = inner
            .sessions
            .values_mut()
            .find(|stored| stored.id == session_id)
            .ok_or_else(|| StoreError {
                message: format!("unknown session id {session_id}"),
            })?;
        stored.frames.extend_from_slice(frames);

        Ok(())
    }

    fn delete(&self, key: &SessionKey) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(key);
        Ok(())
    }

    fn list_sessions(&self) -> StoreResult<Vec<SessionKey>> {
        let inner = self.inner.lock().unwrap();

        let mut keys: Vec<SessionKey> = inner.sessions.keys().copied().collect();
        keys.sort_by_key(|k| (k.year, k.round_number, k.session_type.as_str(), k.fps));

        Ok(keys)
    }
}
