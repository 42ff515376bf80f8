use std::collections::BTreeMap;

use crate::modules::helpers::math::Math;
use crate::modules::models::telemetry::{
    Driver, DriverSnapshot, Frame, FrameSet, Session, SessionKey, TrackStatus,
};
use crate::modules::sync::{FrameClock, SyncedSample, SyncedStream};

/// fixed display palette, assigned to drivers by ascending code so a rebuild
/// of the same session always yields the same colors
const DRIVER_PALETTE: [(u8, u8, u8); 20] = [
    (225, 6, 0),
    (0, 90, 255),
    (255, 135, 0),
    (0, 210, 190),
    (6, 0, 239),
    (220, 0, 120),
    (0, 110, 40),
    (255, 255, 0),
    (160, 32, 240),
    (70, 130, 180),
    (255, 20, 147),
    (46, 139, 87),
    (244, 164, 96),
    (30, 144, 255),
    (205, 92, 92),
    (107, 142, 35),
    (138, 43, 226),
    (255, 99, 71),
    (64, 224, 208),
    (218, 165, 32),
];

pub struct Enricher {}

impl Enricher {
    /// # produce the ordered frame sequence
    /// single pass over all synchronized streams. needs every surviving
    /// driver present because leaderboard and gaps are cross-driver.
    ///
    /// ## Arguments
    /// * `key` - cache key the frames are computed for
    /// * `session` - the validated session
    /// * `streams` - one synchronized stream per surviving driver
    /// * `failed_drivers` - drivers whose streams could not be synchronized
    /// * `clock` - the session frame clock
    ///
    /// ## Returns
    /// * `FrameSet` - the complete replay, flagged degraded if drivers failed
    pub fn enrich(
        key: SessionKey,
        session: &Session,
        streams: &[SyncedStream],
        failed_drivers: Vec<String>,
        clock: &FrameClock,
    ) -> FrameSet {
        let distances: Vec<Vec<Option<f64>>> = streams
            .iter()
            .map(|stream| {
                stream
                    .points
                    .iter()
                    .map(|point| point.as_ref().map(|p| p.distance))
                    .collect()
            })
            .collect();
        let lap_length = Self::estimate_lap_length(&distances, session.total_laps);

        let mut frames = Vec::with_capacity(clock.len());
        for index in 0..clock.len() {
            frames.push(Self::build_frame(
                index, session, streams, &distances, lap_length, clock,
            ));
        }

        let degraded = !failed_drivers.is_empty();
        FrameSet {
            key,
            fps: clock.fps,
            event_name: session.event_name.clone(),
            event_date: session.event_date,
            total_laps: session.total_laps,
            driver_colors: Self::assign_colors(&session.drivers),
            track_statuses: session.track_statuses.clone(),
            frames,
            degraded,
            failed_drivers,
        }
    }

    /// stable palette assignment over the full session driver set
    pub fn assign_colors(drivers: &[Driver]) -> BTreeMap<String, (u8, u8, u8)> {
        let mut codes: Vec<&str> = drivers.iter().map(|d| d.code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();

        codes
            .iter()
            .enumerate()
            .map(|(index, code)| {
                (code.to_string(), DRIVER_PALETTE[index % DRIVER_PALETTE.len()])
            })
            .collect()
    }

    fn build_frame(
        index: usize,
        session: &Session,
        streams: &[SyncedStream],
        distances: &[Vec<Option<f64>>],
        lap_length: Option<f64>,
        clock: &FrameClock,
    ) -> Frame {
        let time = clock.time_at(index);

        // every driver on track at this tick, with a copy of its point
        let mut present: Vec<(usize, SyncedSample)> = streams
            .iter()
            .enumerate()
            .filter_map(|(s, stream)| stream.at(index).map(|p| (s, *p)))
            .collect();

        // descending distance, ties by who got to that distance first,
        // then by code so the order is fully deterministic
        present.sort_by(|a, b| {
            b.1.distance
                .partial_cmp(&a.1.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let reached_a = Self::reached_at(&distances[a.0], index, a.1.distance);
                    let reached_b = Self::reached_at(&distances[b.0], index, b.1.distance);
                    reached_a.cmp(&reached_b)
                })
                .then_with(|| streams[a.0].driver.cmp(&streams[b.0].driver))
        });

        let leader = present.first().map(|(s, _)| *s);

        let mut drivers = BTreeMap::new();
        for (rank, (s, point)) in present.iter().enumerate() {
            let gap_to_leader = leader.map(|l| {
                if l == *s {
                    0.0
                } else {
                    Self::gap_to_leader(&distances[l], index, point.distance, clock.fps)
                }
            });

            drivers.insert(
                streams[*s].driver.clone(),
                DriverSnapshot {
                    x: point.x,
                    y: point.y,
                    speed: point.speed,
                    gear: point.gear,
                    throttle: point.throttle,
                    brake: point.brake,
                    drs: point.drs,
                    distance: point.distance,
                    lap: Self::lap_for_distance(point.distance, lap_length, session.total_laps),
                    position: rank as u32 + 1,
                    gap_to_leader,
                    active: point.active,
                },
            );
        }

        Frame {
            frame_index: index as u32,
            time,
            track_status: Self::status_at(session, time),
            drivers,
        }
    }

    /// most recent status event at or before the frame time, a single linear
    /// timeline shared by every driver
    fn status_at(session: &Session, time: f64) -> TrackStatus {
        match Math::last_at_or_before(&session.track_statuses, time, |e| e.time) {
            Some(index) => session.track_statuses[index].status,
            None => TrackStatus::AllClear,
        }
    }

    /// seconds since the leader's own distance curve first reached
    /// `distance`, measured on the frame clock
    fn gap_to_leader(
        leader_distances: &[Option<f64>],
        frame_index: usize,
        distance: f64,
        fps: u32,
    ) -> f64 {
        match Self::reached_at(leader_distances, frame_index, distance) {
            Some(reached) => (frame_index - reached) as f64 / fps as f64,
            None => 0.0,
        }
    }

    /// first frame index (up to `frame_index`) where the distance series
    /// reached `distance`. the series is non-decreasing over its Some-suffix.
    fn reached_at(series: &[Option<f64>], frame_index: usize, distance: f64) -> Option<usize> {
        let first = series.iter().position(|d| d.is_some())?;
        if first > frame_index {
            return None;
        }

        let mut lo = first;
        let mut hi = frame_index;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let value = series[mid].unwrap_or(f64::NEG_INFINITY);
            if value >= distance - 1e-9 {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        Some(lo)
    }

    /// longest final distance divided by the lap count. good enough to place
    /// a driver on a lap, exact lap timing is out of scope here
    fn estimate_lap_length(distances: &[Vec<Option<f64>>], total_laps: i32) -> Option<f64> {
        if total_laps <= 0 {
            return None;
        }

        let longest = distances
            .iter()
            .filter_map(|series| series.iter().rev().find_map(|d| *d))
            .fold(0.0_f64, f64::max);
        if longest <= 0.0 {
            None
        } else {
            Some(longest / total_laps as f64)
        }
    }

    fn lap_for_distance(distance: f64, lap_length: Option<f64>, total_laps: i32) -> i32 {
        match lap_length {
            Some(length) if length > 0.0 => {
                let lap = (distance / length).floor() as i32 + 1;
                lap.clamp(1, total_laps.max(1))
            }
            _ => 1,
        }
    }
}
