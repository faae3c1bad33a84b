//! Frame-rate monitor.
//!
use std::{
    sync::atomic::{AtomicU32, Ordering},
    sync::Mutex,
    time::Instant,
};

struct MeterWindow {
    frames: u64,
    window_start: Instant,
}

/// Counts rendered frames per wall-clock second.
///
/// `update` is called once per captured frame; roughly once per second the
/// meter publishes the rounded rate and resets its window.
pub struct FpsMeter {
    window: Mutex<MeterWindow>,
    fps: AtomicU32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::new_at(Instant::now())
    }

    fn new_at(now: Instant) -> Self {
        Self {
            window: Mutex::new(MeterWindow {
                frames: 0,
                window_start: now,
            }),
            fps: AtomicU32::new(0),
        }
    }

    /// Count one frame; returns the new rate when a window completed.
    pub fn update(&self) -> Option<u32> {
        self.update_at(Instant::now())
    }

    fn update_at(&self, now: Instant) -> Option<u32> {
        let mut window = self.window.lock().unwrap();
        window.frames += 1;

        let elapsed_ms = now.duration_since(window.window_start).as_millis() as u64;
        if elapsed_ms < 1000 {
            return None;
        }

        let fps = ((window.frames * 1000) as f64 / elapsed_ms as f64).round() as u32;
        self.fps.store(fps, Ordering::Relaxed);
        window.frames = 0;
        window.window_start = now;

        Some(fps)
    }

    /// The most recently published rate.
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use std::time::Duration;

    #[test]
    fn publishes_after_one_second() {
        let start = Instant::now();
        let meter = FpsMeter::new_at(start);

        // 29 updates within the window publish nothing.
        for i in 1..30 {
            let result = meter.update_at(start + Duration::from_millis(i * 34));
            assert_eq!(result, None);
            assert_eq!(meter.fps(), 0);
        }

        // The 30th update crosses the window boundary.
        let fps = meter
            .update_at(start + Duration::from_millis(1050))
            .expect("rate published");
        assert!((29..=30).contains(&fps), "fps was {fps}");
        assert_eq!(meter.fps(), fps);
    }

    #[test]
    fn window_resets_after_publishing() {
        let start = Instant::now();
        let meter = FpsMeter::new_at(start);

        meter.update_at(start + Duration::from_millis(1000)).unwrap();

        // A fresh window publishes independently of the previous one.
        let second = meter
            .update_at(start + Duration::from_millis(2000))
            .expect("rate published");
        assert_eq!(second, 1);
    }
}
