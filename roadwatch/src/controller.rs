//! Controller consuming worker events.
//!
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use common::protocol::{Detection, WorkerEvent};
use tokio::sync::mpsc;

use crate::{
    alert::{PersonAlert, PERSON_CLASS, PERSON_CONFIDENCE},
    as_jpeg_stream_item,
    gps::GpsTracker,
    logbook::{DetectionLog, LogEntry, NO_COORDINATES},
    render,
    sensors::LatestFrame,
    AnnotatedSender,
};

/// Invoked once when the model reports ready, starts the capture loop.
pub type OnReady = Box<dyn FnOnce() + Send>;

/// Reacts to worker events: draws boxes on the latest frame, appends log
/// entries and raises the pedestrian warning.
///
/// The controller never blocks frame submission; the overlay always reflects
/// the most recent prediction batch on the most recent captured frame.
pub struct Controller {
    gps: Arc<GpsTracker>,
    alert: Arc<PersonAlert>,
    logbook: Arc<Mutex<DetectionLog>>,
    latest_frame: LatestFrame,
    annotated_tx: AnnotatedSender,
    on_ready: Option<OnReady>,
}

impl Controller {
    pub fn new(
        gps: Arc<GpsTracker>,
        alert: Arc<PersonAlert>,
        logbook: Arc<Mutex<DetectionLog>>,
        latest_frame: LatestFrame,
        annotated_tx: AnnotatedSender,
        on_ready: OnReady,
    ) -> Self {
        Self {
            gps,
            alert,
            logbook,
            latest_frame,
            annotated_tx,
            on_ready: Some(on_ready),
        }
    }

    pub async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::ModelLoaded => {
                    log::info!("Model loaded, starting detection");
                    if let Some(on_ready) = self.on_ready.take() {
                        on_ready();
                    }
                }
                WorkerEvent::Predictions { predictions } => {
                    self.handle_predictions(&predictions, Instant::now());
                }
            }
        }
    }

    /// Process one prediction batch.
    pub fn handle_predictions(&self, predictions: &[Detection], now: Instant) {
        let displayable = render::qualifying(predictions);

        self.publish_annotated_frame(&displayable);

        let coordinates = self
            .gps
            .current()
            .map(|fix| format!("{},{}", fix.latitude, fix.longitude))
            .unwrap_or_else(|| NO_COORDINATES.to_owned());

        let mut logbook = self.logbook.lock().unwrap();
        for detection in &displayable {
            logbook.push(LogEntry::from_detection(
                detection,
                coordinates.clone(),
                Utc::now(),
            ));

            if detection.class == PERSON_CLASS && detection.score > PERSON_CONFIDENCE {
                self.alert.raise(
                    format!(
                        "Pedestrian detected {:.0}% confidence",
                        detection.score * 100.0
                    ),
                    now,
                );
            }
        }
    }

    /// Draw the batch on the latest frame and broadcast it as a JPEG.
    fn publish_annotated_frame(&self, displayable: &[&Detection]) {
        let frame = self.latest_frame.lock().unwrap().clone();
        let Some(mut frame) = frame else {
            log::debug!("No frame captured yet, skipping overlay");
            return;
        };

        render::draw_detections(&mut frame, displayable);

        match turbojpeg::compress_image(&frame, 75, turbojpeg::Subsamp::Sub2x2) {
            Ok(buf) => {
                // Send errors just mean that nobody is streaming right now.
                self.annotated_tx.send(as_jpeg_stream_item(&buf)).ok();
            }
            Err(err) => log::error!("Failed to encode annotated frame: {}", err),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::broadcast_channel;
    use image::RgbImage;

    fn detection(class: &str, score: f32) -> Detection {
        Detection {
            class: class.into(),
            score,
            bbox: [10.0, 10.0, 30.0, 30.0],
        }
    }

    fn controller_with(
        latest: Option<RgbImage>,
    ) -> (Controller, Arc<Mutex<DetectionLog>>, Arc<PersonAlert>) {
        let gps = Arc::new(GpsTracker::new());
        let alert = Arc::new(PersonAlert::new());
        let logbook = Arc::new(Mutex::new(DetectionLog::new()));
        let (annotated_tx, _annotated_rx) = broadcast_channel();

        let controller = Controller::new(
            gps,
            Arc::clone(&alert),
            Arc::clone(&logbook),
            Arc::new(Mutex::new(latest)),
            annotated_tx,
            Box::new(|| {}),
        );
        (controller, logbook, alert)
    }

    #[test]
    fn logs_one_entry_per_qualifying_detection() {
        let (controller, logbook, _) = controller_with(None);

        let batch = vec![
            detection("car", 0.6),
            detection("car", 0.6),
            detection("dog", 0.5),
            detection("cat", 0.3),
        ];
        controller.handle_predictions(&batch, Instant::now());

        // Same-class detections are not aggregated, quantity stays 1.
        let logbook = logbook.lock().unwrap();
        assert_eq!(logbook.len(), 2);
        for entry in logbook.tail(5) {
            assert_eq!(entry.event, "car");
            assert_eq!(entry.quantity, 1);
            assert_eq!(entry.coordinates, NO_COORDINATES);
        }
    }

    #[test]
    fn only_confident_person_detections_raise_the_alert() {
        let (controller, _, alert) = controller_with(None);
        let now = Instant::now();

        controller.handle_predictions(&[detection("person", 0.65)], now);
        assert!(!alert.is_active(now));

        controller.handle_predictions(&[detection("person", 0.71)], now);
        assert!(alert.is_active(now));
    }

    #[test]
    fn missing_frame_does_not_block_logging() {
        let (controller, logbook, _) = controller_with(None);

        controller.handle_predictions(&[detection("bicycle", 0.9)], Instant::now());
        assert_eq!(logbook.lock().unwrap().len(), 1);
    }
}
