//! Geolocation tracker with instantaneous speed.
//!
use std::sync::Mutex;

use common::protocol::FixMsg;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single geolocation sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: u64,
}

impl From<FixMsg> for Fix {
    fn from(msg: FixMsg) -> Self {
        Self {
            latitude: msg.latitude,
            longitude: msg.longitude,
            timestamp_ms: msg.timestamp_ms,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    current: Option<Fix>,
    previous: Option<Fix>,
    speed_kmh: Option<f64>,
}

/// Tracks the latest two fixes and derives the current speed.
///
/// Only the current and the immediately previous fix are retained. The
/// tracker is owned by whoever constructs it and shared via `Arc`, it is not
/// a process-wide singleton.
#[derive(Debug, Default)]
pub struct GpsTracker {
    state: Mutex<TrackerState>,
}

impl GpsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new fix and update the derived speed.
    ///
    /// The speed update is skipped when there is no previous fix or the
    /// elapsed time between fixes is zero.
    pub fn push(&self, fix: Fix) {
        let mut state = self.state.lock().unwrap();
        state.previous = state.current;
        state.current = Some(fix);

        if let (Some(previous), Some(current)) = (state.previous, state.current) {
            let elapsed_ms = current.timestamp_ms.saturating_sub(previous.timestamp_ms);
            if elapsed_ms == 0 {
                log::debug!("skipping speed update, no time elapsed between fixes");
                return;
            }

            let meters = haversine_distance(
                previous.latitude,
                previous.longitude,
                current.latitude,
                current.longitude,
            );
            state.speed_kmh = Some(meters / (elapsed_ms as f64 / 1000.0) * 3.6);
        }
    }

    /// The last known fix, if any fix arrived yet.
    pub fn current(&self) -> Option<Fix> {
        self.state.lock().unwrap().current
    }

    pub fn speed_kmh(&self) -> Option<f64> {
        self.state.lock().unwrap().speed_kmh
    }
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod test {

    use super::*;

    fn fix(latitude: f64, longitude: f64, timestamp_ms: u64) -> Fix {
        Fix {
            latitude,
            longitude,
            timestamp_ms,
        }
    }

    #[test]
    fn identical_fixes_give_zero_speed() {
        let tracker = GpsTracker::new();
        tracker.push(fix(52.5, 13.4, 0));
        tracker.push(fix(52.5, 13.4, 1000));

        assert_eq!(tracker.speed_kmh(), Some(0.0));
    }

    #[test]
    fn one_kilometer_per_hour() {
        // 1000 m north of the first fix, reached after one hour.
        let delta_lat = (1000.0 / EARTH_RADIUS_M).to_degrees();

        let tracker = GpsTracker::new();
        tracker.push(fix(52.5, 13.4, 0));
        tracker.push(fix(52.5 + delta_lat, 13.4, 3_600_000));

        let speed = tracker.speed_kmh().unwrap();
        assert!((speed - 1.0).abs() < 1e-3, "speed was {speed}");
    }

    #[test]
    fn zero_elapsed_time_skips_speed_update() {
        let tracker = GpsTracker::new();
        tracker.push(fix(52.5, 13.4, 1000));
        tracker.push(fix(52.6, 13.4, 1000));

        assert_eq!(tracker.speed_kmh(), None);
        assert_eq!(tracker.current().unwrap().latitude, 52.6);
    }

    #[test]
    fn first_fix_has_no_speed() {
        let tracker = GpsTracker::new();
        assert!(tracker.current().is_none());

        tracker.push(fix(52.5, 13.4, 0));
        assert_eq!(tracker.speed_kmh(), None);
        assert!(tracker.current().is_some());
    }
}
