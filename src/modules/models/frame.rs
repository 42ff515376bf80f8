use std::collections::BTreeMap;

use diesel::prelude::*;
use diesel::result::Error;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};

use crate::modules::models::telemetry::{DriverSnapshot, Frame, TrackStatus};
use crate::schema::frames;

/// the serialized per-driver snapshot set stored in the payload column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub track_status: TrackStatus,
    pub drivers: BTreeMap<String, DriverSnapshot>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = frames)]
pub struct NewFrameRow {
    pub session_id: i32,
    pub frame_index: i32,
    pub time: f64,
    pub payload: serde_json::Value,
}

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = frames)]
pub struct FrameRow {
    pub id: i32,
    pub session_id: i32,
    pub frame_index: i32,
    pub time: f64,
    pub payload: serde_json::Value,
}

impl NewFrameRow {
    pub fn from_frame(session_id: i32, frame: &Frame) -> Result<NewFrameRow, serde_json::Error> {
        let payload = FramePayload {
            track_status: frame.track_status,
            drivers: frame.drivers.clone(),
        };

        Ok(NewFrameRow {
            session_id,
            frame_index: frame.frame_index as i32,
            time: frame.time,
            payload: serde_json::to_value(payload)?,
        })
    }
}

impl FrameRow {
    /// # insert one batch of frames
    /// single multi-row insert, the unit of the retry policy
    ///
    /// ## Arguments
    /// * `conn` - the database connection
    /// * `rows` - the batch to insert
    pub fn insert_batch(conn: &mut PgConnection, rows: &[NewFrameRow]) -> Result<usize, Error> {
        diesel::insert_into(frames::table).values(rows).execute(conn)
    }

    /// # load all frames of a session
    ///
    /// ## Arguments
    /// * `conn` - the database connection
    /// * `session_id_in` - database id of the session
    ///
    /// ## Returns
    /// * `Vec<FrameRow>` - ordered by frame index
    pub fn for_session(
        conn: &mut PgConnection,
        session_id_in: i32,
    ) -> Result<Vec<FrameRow>, Error> {
        use crate::schema::frames::dsl::*;

        frames
            .filter(session_id.eq(session_id_in))
            .order(frame_index.asc())
            .load(conn)
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        let payload: FramePayload = serde_json::from_value(self.payload.clone())?;

        Ok(Frame {
            frame_index: self.frame_index as u32,
            time: self.time,
            track_status: payload.track_status,
            drivers: payload.drivers,
        })
    }
}
