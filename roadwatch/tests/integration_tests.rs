//! End-to-end pipeline test with a scripted model.
//!
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::protocol::{Detection, ImageFrame, WorkerCommand, WorkerEvent};
use image::RgbImage;
use roadwatch::{
    alert::PersonAlert,
    broadcast_channel,
    controller::Controller,
    gps::{Fix, GpsTracker},
    logbook::DetectionLog,
    nn::InferModel,
    worker::spawn_detection_worker,
};

struct ScriptedModel;

impl InferModel for ScriptedModel {
    fn run(&self, _image_data: &ImageFrame) -> anyhow::Result<Vec<Detection>> {
        Ok(vec![Detection {
            class: "person".into(),
            score: 0.82,
            bbox: [10.0, 10.0, 50.0, 80.0],
        }])
    }
}

#[tokio::test]
async fn load_detect_log_and_warn_roundtrip() {
    let (cmd_tx, mut event_rx) = spawn_detection_worker(|| async { Ok(ScriptedModel) });

    // load -> modelLoaded
    cmd_tx.send(WorkerCommand::Load).await.unwrap();
    assert!(matches!(
        event_rx.recv().await,
        Some(WorkerEvent::ModelLoaded)
    ));

    // detect(frame) -> predictions
    let image_data = ImageFrame {
        width: 64,
        height: 64,
        data: vec![0u8; 64 * 64 * 4],
    };
    cmd_tx
        .send(WorkerCommand::Detect { image_data })
        .await
        .unwrap();
    let predictions = match event_rx.recv().await {
        Some(WorkerEvent::Predictions { predictions }) => predictions,
        other => panic!("expected predictions, got {other:?}"),
    };
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].class, "person");

    // Feed the batch through the controller.
    let gps = Arc::new(GpsTracker::new());
    gps.push(Fix {
        latitude: 52.520008,
        longitude: 13.404954,
        timestamp_ms: 0,
    });
    let alert = Arc::new(PersonAlert::new());
    let logbook = Arc::new(Mutex::new(DetectionLog::new()));
    let latest_frame = Arc::new(Mutex::new(Some(RgbImage::new(64, 64))));
    let (annotated_tx, mut annotated_rx) = broadcast_channel();

    let controller = Controller::new(
        Arc::clone(&gps),
        Arc::clone(&alert),
        Arc::clone(&logbook),
        latest_frame,
        annotated_tx,
        Box::new(|| {}),
    );

    let now = Instant::now();
    controller.handle_predictions(&predictions, now);

    // One annotated frame was published as a multipart stream item.
    let part = annotated_rx.try_recv().expect("annotated frame published");
    assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg"));

    // One log entry with the person event.
    {
        let logbook = logbook.lock().unwrap();
        assert_eq!(logbook.len(), 1);
        let entry = &logbook.tail(5)[0];
        assert_eq!(entry.event, "person");
        assert_eq!(entry.confidence, "0.82");
        assert_eq!(entry.coordinates, "52.520008,13.404954");
        assert_eq!(entry.quantity, 1);
    }

    // The warning shows for one second, then disappears.
    assert!(alert.is_active(now));
    assert!(alert.is_active(now + Duration::from_millis(999)));
    assert!(!alert.is_active(now + Duration::from_millis(1000)));

    // The exported CSV carries header plus the one entry, with the
    // comma-bearing coordinates intact.
    let csv = logbook.lock().unwrap().to_csv().unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "DateTime,Event,Coordinates,Quantity,Confidence");
    assert!(lines[1].contains("\"52.520008,13.404954\""));
}
