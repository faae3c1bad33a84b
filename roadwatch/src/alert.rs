//! Transient pedestrian warning indicator.
//!
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

pub const PERSON_CLASS: &str = "person";

/// Confidence above which a person detection raises the warning.
pub const PERSON_CONFIDENCE: f32 = 0.7;

/// How long the warning stays visible after the last qualifying detection.
pub const WARNING_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug, Default)]
struct AlertState {
    deadline: Option<Instant>,
    message: Option<String>,
}

/// A single warning indicator with a re-armed display window.
///
/// A new qualifying detection while the window is open extends the deadline
/// instead of stacking a second indicator; the displayed message is only
/// replaced once the previous window has expired.
#[derive(Debug, Default)]
pub struct PersonAlert {
    state: Mutex<AlertState>,
}

impl PersonAlert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, message: String, now: Instant) {
        let mut state = self.state.lock().unwrap();
        let active = state.deadline.map_or(false, |deadline| now < deadline);
        if !active {
            state.message = Some(message);
        }
        state.deadline = Some(now + WARNING_WINDOW);
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.state
            .lock()
            .unwrap()
            .deadline
            .map_or(false, |deadline| now < deadline)
    }

    /// The warning text while the window is open.
    pub fn message(&self, now: Instant) -> Option<String> {
        let state = self.state.lock().unwrap();
        match state.deadline {
            Some(deadline) if now < deadline => state.message.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn window_closes_after_one_second() {
        let alert = PersonAlert::new();
        let t0 = Instant::now();

        alert.raise("Pedestrian detected".into(), t0);
        assert!(alert.is_active(t0));
        assert!(alert.is_active(t0 + Duration::from_millis(999)));
        assert!(!alert.is_active(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn rearming_keeps_a_single_continuous_window() {
        let alert = PersonAlert::new();
        let t0 = Instant::now();

        alert.raise("first".into(), t0);
        alert.raise("second".into(), t0 + Duration::from_millis(500));

        // No flicker between the two detections...
        for ms in [0, 250, 499, 500, 750, 999, 1000, 1499] {
            assert!(
                alert.is_active(t0 + Duration::from_millis(ms)),
                "inactive at +{ms}ms"
            );
        }
        // ...and gone exactly one second after the second detection.
        assert!(!alert.is_active(t0 + Duration::from_millis(1500)));

        // The visible text is not replaced while the window is open.
        assert_eq!(
            alert.message(t0 + Duration::from_millis(600)).as_deref(),
            Some("first")
        );
    }

    #[test]
    fn message_clears_with_the_window() {
        let alert = PersonAlert::new();
        let t0 = Instant::now();

        alert.raise("warning".into(), t0);
        assert!(alert.message(t0 + WARNING_WINDOW).is_none());

        // A later raise replaces the expired text.
        alert.raise("fresh".into(), t0 + Duration::from_millis(2000));
        assert_eq!(
            alert.message(t0 + Duration::from_millis(2100)).as_deref(),
            Some("fresh")
        );
    }
}
