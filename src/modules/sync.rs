use serde::{Deserialize, Serialize};

use crate::errors::{CustomResult, Error};
use crate::modules::helpers::math::Math;
use crate::modules::models::telemetry::TelemetrySample;

/// The uniform replay clock. Frame `i` sits at `start + i / fps`, the last
/// frame is the last tick that still fits inside the session window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    pub start: f64,
    pub end: f64,
    pub fps: u32,
}

impl FrameClock {
    pub fn new(start: f64, end: f64, fps: u32) -> FrameClock {
        FrameClock { start, end, fps }
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start) * self.fps as f64).floor() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.start + index as f64 / self.fps as f64
    }
}

/// one driver's state resampled onto a single clock tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncedSample {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub gear: i32,
    pub throttle: f64,
    pub brake: f64,
    pub drs: i32,
    pub distance: f64,
    /// false once the raw stream ran out and values are held
    pub active: bool,
}

/// one driver's full resampled stream, aligned with the frame clock.
/// `None` means the driver was not yet on track at that tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedStream {
    pub driver: String,
    pub points: Vec<Option<SyncedSample>>,
}

impl SyncedStream {
    pub fn at(&self, index: usize) -> Option<&SyncedSample> {
        self.points.get(index).and_then(|p| p.as_ref())
    }
}

/// # resample one driver onto the frame clock
/// between two raw samples position, speed, pedals and distance are linearly
/// interpolated; gear and drs hold the preceding value. after the last raw
/// sample everything is held and the sample is flagged inactive. before the
/// first raw sample the driver is absent.
///
/// ## Arguments
/// * `driver` - driver code, only used for error context
/// * `samples` - raw samples sorted by time
/// * `clock` - the session frame clock
///
/// ## Returns
/// * `SyncedStream` - one entry per clock tick
pub fn resample_driver(
    driver: &str,
    samples: &[TelemetrySample],
    clock: &FrameClock,
) -> CustomResult<SyncedStream> {
    validate_samples(driver, samples)?;

    let mut points = Vec::with_capacity(clock.len());
    for index in 0..clock.len() {
        let t = clock.time_at(index);
        points.push(sample_at(samples, t));
    }

    Ok(SyncedStream {
        driver: driver.to_string(),
        points,
    })
}

fn validate_samples(driver: &str, samples: &[TelemetrySample]) -> CustomResult<()> {
    if samples.is_empty() {
        return Err(Error::PartialComputationError {
            driver: driver.to_string(),
            message: "empty telemetry stream".to_string(),
        });
    }

    let mut previous_time = f64::NEG_INFINITY;
    for sample in samples {
        let finite = sample.time.is_finite()
            && sample.x.is_finite()
            && sample.y.is_finite()
            && sample.speed.is_finite()
            && sample.distance.is_finite();
        if !finite {
            return Err(Error::PartialComputationError {
                driver: driver.to_string(),
                message: format!("non-finite values at t={}", sample.time),
            });
        }
        if sample.time < previous_time {
            return Err(Error::PartialComputationError {
                driver: driver.to_string(),
                message: format!("timestamps not monotonic at t={}", sample.time),
            });
        }
        previous_time = sample.time;
    }

    Ok(())
}

fn sample_at(samples: &[TelemetrySample], t: f64) -> Option<SyncedSample> {
    let index = Math::last_at_or_before(samples, t, |s| s.time)?;
    let before = &samples[index];

    if index + 1 < samples.len() {
        let after = &samples[index + 1];
        let fraction = Math::fraction_between(t, before.time, after.time);
        Some(SyncedSample {
            x: Math::lerp(before.x, after.x, fraction),
            y: Math::lerp(before.y, after.y, fraction),
            speed: Math::lerp(before.speed, after.speed, fraction),
            gear: before.gear,
            throttle: Math::lerp(before.throttle, after.throttle, fraction),
            brake: Math::lerp(before.brake, after.brake, fraction),
            drs: before.drs,
            distance: Math::lerp(before.distance, after.distance, fraction),
            active: true,
        })
    } else {
        // stream ran out, hold the last known values
        Some(SyncedSample {
            x: before.x,
            y: before.y,
            speed: before.speed,
            gear: before.gear,
            throttle: before.throttle,
            brake: before.brake,
            drs: before.drs,
            distance: before.distance,
            active: t - before.time <= 1e-9,
        })
    }
}
