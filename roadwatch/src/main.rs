//! roadwatch service binary.
//!
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use axum::{routing::get, Extension, Router};
use clap::Parser;
use common::protocol::WorkerCommand;
use env_logger::TimestampPrecision;
use roadwatch::{
    alert::PersonAlert,
    broadcast_channel,
    controller::Controller,
    data_socket::spawn_fix_socket,
    endpoints::{self, AppState},
    gps::GpsTracker,
    logbook::DetectionLog,
    meter::FpsMeter,
    nn::SsdMobilenet,
    sensors,
    worker::spawn_detection_worker,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP endpoints on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the GPS fix socket
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Capture resolution like 1280x720 (camera maximum if omitted)
    #[clap(long)]
    resolution: Option<String>,

    /// Path to the detection model (downloaded to the cache dir if omitted)
    #[clap(long)]
    model: Option<std::path::PathBuf>,

    /// Minimum model confidence for candidate detections
    #[clap(long, default_value_t = 0.2)]
    min_confidence: f32,

    /// Maximum IoU between kept bounding boxes
    #[clap(long, default_value_t = 0.5)]
    max_iou: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let resolution = args.resolution.as_deref().map(parse_resolution).transpose()?;

    // Injected services shared between the pipeline and the HTTP layer.
    let gps = Arc::new(GpsTracker::new());
    let meter = Arc::new(FpsMeter::new());
    let alert = Arc::new(PersonAlert::new());
    let logbook = Arc::new(Mutex::new(DetectionLog::new()));
    let latest_frame = Arc::new(Mutex::new(None));
    let (annotated_tx, _) = broadcast_channel();

    // Camera first: without it the service does not start.
    let capture_fn = sensors::get_capture_fn_linux(&args.device, "MJPG", resolution, None)?;

    // Spawn the detection worker with a retryable model loader.
    let model_path = args.model.clone();
    let min_confidence = args.min_confidence;
    let max_iou = args.max_iou;
    let (cmd_tx, event_rx) = spawn_detection_worker(move || {
        let model_path = model_path.clone();
        async move { SsdMobilenet::load(model_path, min_confidence, max_iou).await }
    });

    // The capture loop starts once the worker reports the model ready.
    let capture_cmd_tx = cmd_tx.clone();
    let capture_meter = Arc::clone(&meter);
    let capture_latest = Arc::clone(&latest_frame);
    let controller = Controller::new(
        Arc::clone(&gps),
        Arc::clone(&alert),
        Arc::clone(&logbook),
        latest_frame,
        annotated_tx.clone(),
        Box::new(move || {
            sensors::spawn_capture_loop(capture_fn, capture_cmd_tx, capture_meter, capture_latest);
        }),
    );
    tokio::spawn(controller.run(event_rx));

    cmd_tx.send(WorkerCommand::Load).await?;

    // Create socket to receive GPS fixes via network
    spawn_fix_socket(Arc::clone(&gps), &args.socket_address).await?;

    // Build HTTP server with endpoints
    let state = Arc::new(AppState {
        logbook,
        gps,
        alert,
        meter,
        annotated_tx,
    });
    let app = Router::new()
        .route("/healthcheck", get(endpoints::healthcheck))
        .route("/stream", get(endpoints::detection_stream))
        .route("/logs", get(endpoints::recent_logs))
        .route("/export", get(endpoints::export_csv))
        .route("/status", get(endpoints::status))
        .layer(Extension(state));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

fn parse_resolution(arg: &str) -> Result<(u32, u32)> {
    let (width, height) = arg
        .split_once('x')
        .ok_or_else(|| anyhow!("resolution must look like 1280x720"))?;
    Ok((width.parse()?, height.parse()?))
}
