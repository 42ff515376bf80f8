use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::result::Error;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};

use crate::modules::models::telemetry::SessionKey;
use crate::schema::sessions;

#[derive(Insertable, Serialize, Debug, Clone, Deserialize)]
#[diesel(table_name = sessions)]
pub struct NewSessionRow {
    pub year: i32,
    pub round_number: i32,
    pub session_type: String,
    pub fps: i32,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub total_laps: i32,
    pub driver_colors: serde_json::Value,
    pub track_statuses: serde_json::Value,
    pub degraded: bool,
    pub failed_drivers: serde_json::Value,
}

#[derive(Queryable, Identifiable, Serialize, PartialEq, Debug, Clone, Deserialize)]
#[diesel(table_name = sessions)]
pub struct SessionRow {
    pub id: i32,
    pub year: i32,
    pub round_number: i32,
    pub session_type: String,
    pub fps: i32,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub total_laps: i32,
    pub driver_colors: serde_json::Value,
    pub track_statuses: serde_json::Value,
    pub degraded: bool,
    pub failed_drivers: serde_json::Value,
}

impl SessionRow {
    /// # insert a new session
    ///
    /// ## Arguments
    /// * `conn` - the database connection
    /// * `new_session` - the row to insert
    ///
    /// ## Returns
    /// * `SessionRow` - the inserted row with its id
    pub fn new(conn: &mut PgConnection, new_session: &NewSessionRow) -> Result<SessionRow, Error> {
        diesel::insert_into(sessions::table)
            .values(new_session)
            .get_result(conn)
    }

    /// # list every stored session
    ///
    /// ## Arguments
    /// * `conn` - the database connection
    ///
    /// ## Returns
    /// * `Vec<SessionRow>` - all rows, ordered by year then round
    pub fn all(conn: &mut PgConnection) -> Result<Vec<SessionRow>, Error> {
        use crate::schema::sessions::dsl::*;

        sessions
            .order((year.asc(), round_number.asc()))
            .load(conn)
    }

    /// # get a session by its cache key
    ///
    /// ## Arguments
    /// * `conn` - the database connection
    /// * `key` - the full cache key, fps included
    ///
    /// ## Returns
    /// * `Option<SessionRow>` - the row, None when absent
    pub fn get_by_key(
        conn: &mut PgConnection,
        key: &SessionKey,
    ) -> Result<Option<SessionRow>, Error> {
        Self::by_key(key).first(conn).optional()
    }

    /// # delete a session and all of its frames
    ///
    /// ## Arguments
    /// * `conn` - the database connection
    /// * `key` - the full cache key, fps included
    pub fn delete_by_key(conn: &mut PgConnection, key: &SessionKey) -> Result<(), Error> {
        use crate::schema::frames;

        if let Some(row) = Self::get_by_key(conn, key)? {
            diesel::delete(frames::table.filter(frames::session_id.eq(row.id))).execute(conn)?;
            diesel::delete(sessions::table.filter(sessions::id.eq(row.id))).execute(conn)?;
        }

        Ok(())
    }

    fn by_key(key: &SessionKey) -> sessions::BoxedQuery<'static, diesel::pg::Pg> {
        use crate::schema::sessions::dsl::*;

        sessions
            .filter(year.eq(key.year))
            .filter(round_number.eq(key.round_number))
            .filter(session_type.eq(key.session_type.as_str().to_string()))
            .filter(fps.eq(key.fps as i32))
            .into_boxed()
    }
}
